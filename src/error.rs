use thiserror::Error;

/// Fatal conditions with a documented process exit code. Everything else
/// propagates as a plain report and exits with the generic code 2.
#[derive(Error, Debug)]
pub enum Fatal {
    /// An external tool is not installed or not in PATH.
    #[error("cannot find \"{0}\" in PATH")]
    MissingTool(String),

    #[error("cannot read input object {0}")]
    UnreadableInput(String),

    /// The disassembler reported `No DWARF` for the object.
    #[error("no DWARF debug info in {0}")]
    NoDebugInfo(String),

    #[error("missing runtime module: {0}")]
    MissingModule(String),
}

pub const EXIT_GENERIC: i32 = 2;

impl Fatal {
    pub fn exit_code(&self) -> i32 {
        match self {
            Fatal::MissingTool(_) => 3,
            Fatal::UnreadableInput(_) | Fatal::NoDebugInfo(_) => 4,
            Fatal::MissingModule(_) => 9,
        }
    }
}
