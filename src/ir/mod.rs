pub mod builder;
pub mod control_flow;
pub mod control_trace;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod resolve;
pub mod trace;
pub mod visitor;
