//! wgpu render pipelines and GPU texture helpers used by
//! [`WgpuApi`](crate::api::wgpu_api::WgpuApi).

pub mod fixed_function;
pub mod texture;
