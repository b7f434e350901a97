use crate::api::{GpuProgram, ShaderSource};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub usize);

/// A linked program together with the sources it was built from.
#[derive(Debug)]
pub struct Shader {
    pub source: ShaderSource,
    /// `None` when linking failed; materials then draw without a program.
    pub program: Option<GpuProgram>,
}

impl Shader {
    pub fn name(&self) -> &str {
        &self.source.name
    }
}
