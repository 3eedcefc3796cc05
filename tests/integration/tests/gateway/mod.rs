mod core_tools_pipeline;
mod namespacing;
mod reconnect_convergence;
