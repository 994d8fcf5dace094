pub mod device_ctx;
pub mod pipeline_ctx;
