//! Typed completion events.

use std::os::fd::RawFd;

use crate::table::OpKind;

/// Kind-specific result of a successful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Bytes transferred by a receive or send.
    Bytes(usize),
    /// Descriptor of the connection produced by an accept.
    Accepted(RawFd),
}

/// One reaped completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<C> {
    pub kind: OpKind,
    /// Caller context given at submission.
    pub context: C,
    /// `Err(errno)` when the kernel reported a negative result.
    pub outcome: Result<Outcome, i32>,
}

impl<C> Event<C> {
    /// Translate a raw CQE result for an operation of `kind`.
    pub(crate) fn from_result(kind: OpKind, context: C, res: i32) -> Self {
        let outcome = if res < 0 {
            Err(-res)
        } else {
            Ok(match kind {
                OpKind::Recv | OpKind::Send => Outcome::Bytes(res as usize),
                OpKind::Accept => Outcome::Accepted(res),
            })
        };
        Self { kind, context, outcome }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    #[inline]
    pub fn errno(&self) -> Option<i32> {
        self.outcome.err()
    }

    /// Byte count of a successful receive/send.
    pub fn bytes(&self) -> Option<usize> {
        match self.outcome {
            Ok(Outcome::Bytes(n)) => Some(n),
            _ => None,
        }
    }

    /// New descriptor of a successful accept.
    pub fn handle(&self) -> Option<RawFd> {
        match self.outcome {
            Ok(Outcome::Accepted(fd)) => Some(fd),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_by_kind() {
        let ev = Event::from_result(OpKind::Recv, 'a', 12);
        assert_eq!(ev.bytes(), Some(12));
        assert_eq!(ev.handle(), None);

        let ev = Event::from_result(OpKind::Accept, 'b', 9);
        assert_eq!(ev.handle(), Some(9));
        assert_eq!(ev.bytes(), None);
        assert!(!ev.is_error());
    }

    #[test]
    fn test_negative_result_is_errno() {
        let ev = Event::from_result(OpKind::Accept, (), -libc::EAGAIN);
        assert!(ev.is_error());
        assert_eq!(ev.errno(), Some(libc::EAGAIN));
        assert_eq!(ev.handle(), None);
    }

    #[test]
    fn test_zero_bytes_is_success() {
        // EOF on a receive.
        let ev = Event::from_result(OpKind::Recv, (), 0);
        assert_eq!(ev.outcome, Ok(Outcome::Bytes(0)));
    }
}
