//! Backend bridge: command queue intake and the worker that owns the flow controller.

pub mod commands;
pub mod runtime;
