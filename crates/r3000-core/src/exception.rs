use crate::memory::MemoryError;
use r3000_decomp::Exception;

/// What ultimately went wrong underneath an [`ExecutionException`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("{0}")]
    Architectural(Exception),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl Fault {
    /// The architectural exception this fault maps onto.
    pub const fn exception(&self) -> Exception {
        match self {
            Self::Architectural(exception) => *exception,
            Self::Memory(err) => err.exception(),
        }
    }
}

/// A fault raised while executing guest code, carrying the address execution has to resume from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}{}", describe_cause(.cause))]
pub struct ExecutionException {
    message: String,
    pc: u32,
    #[source]
    cause: Option<Fault>,
}

fn describe_cause(cause: &Option<Fault>) -> String {
    cause
        .as_ref()
        .map(|cause| format!(" ({cause})"))
        .unwrap_or_default()
}

impl ExecutionException {
    pub fn new(message: impl Into<String>, pc: u32, cause: Option<Fault>) -> Self {
        Self {
            message: message.into(),
            pc,
            cause,
        }
    }

    /// An architectural exception raised by the instruction at `pc`.
    pub fn architectural(exception: Exception, pc: u32) -> Self {
        Self::new(
            format!("{exception} at {pc:#010x}"),
            pc,
            Some(Fault::Architectural(exception)),
        )
    }

    pub fn memory(err: MemoryError, pc: u32) -> Self {
        Self::new(
            format!("{} at {pc:#010x}", err.exception()),
            pc,
            Some(Fault::Memory(err)),
        )
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn pc(&self) -> u32 {
        self.pc
    }

    pub const fn cause(&self) -> Option<&Fault> {
        self.cause.as_ref()
    }
}

/// Why compiled code handed control back before its routine returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// An enabled breakpoint was reached, the instruction at `address` has not executed yet.
    Breakpoint { address: u32 },
    Exception(ExecutionException),
    /// The stop flag was raised. `pc` is the next instruction to execute.
    Stopped { pc: u32 },
}

impl From<ExecutionException> for Signal {
    fn from(value: ExecutionException) -> Self {
        Self::Exception(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_and_without_cause() {
        let panic = ExecutionException::new("no memory view attached", 0x8000_0000, None);
        assert_eq!(panic.to_string(), "no memory view attached");
        assert_eq!(panic.cause(), None);

        let overflow = ExecutionException::architectural(Exception::Overflow, 0x8001_0010);
        assert_eq!(
            overflow.to_string(),
            "arithmetic overflow at 0x80010010 (arithmetic overflow)"
        );
        assert_eq!(overflow.pc(), 0x8001_0010);
        assert_eq!(overflow.cause().map(Fault::exception), Some(Exception::Overflow));
    }

    #[test]
    fn memory_faults_map_to_bus_errors() {
        let err = ExecutionException::memory(MemoryError::Unmapped { address: 0x1F00_0000 }, 4);
        assert_eq!(err.cause().map(Fault::exception), Some(Exception::DataBusError));
        assert!(err.to_string().ends_with("(unmapped address 0x1f000000)"));
    }
}
