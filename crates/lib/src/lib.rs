//! bakelua-lib: the core of the bakelua build orchestrator.
//!
//! Build files are Lua scripts which register properties, options and targets
//! against a parse context. Once parsing ends the graph is frozen, abstract
//! dependency declarations are expanded into a concrete file/target DAG, and
//! a worker pool drives the out-of-date subset of targets through their clean
//! and build phases. A persistent per-target cache of input fingerprints
//! decides what is out of date.
//!
//! The `lua` module is the only place the embedded interpreter appears; the
//! rest of the engine sees targets purely through the [`target::Target`]
//! contract.

pub mod cache;
pub mod consts;
pub mod context;
pub mod error;
pub mod eval;
pub mod executor;
pub mod graph;
pub mod location;
pub mod lock;
pub mod lua;
pub mod path;
pub mod pathset;
pub mod props;
pub mod resolver;
pub mod state;
pub mod target;
pub mod targets;
