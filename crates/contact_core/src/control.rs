/// How a running pipeline reacts to a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Let in-flight targets finish, then drain.
    Finish,
    /// Abort in-flight targets; their checkpoints are recovered on next load.
    Immediate,
}
