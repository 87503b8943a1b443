//! Processing and finished callback contracts

use crate::stream::context::CallbackData;
use crate::stream::diagnostics::Diagnostic;
use crate::types::Verdict;

/// Value a processing callback hands back, before validation
///
/// Typed callbacks return a [`Verdict`] and can never be wrong. Callbacks
/// bridged from a dynamically typed boundary may return an arbitrary integer
/// or something that is not an integer at all; the bridge validates those
/// and treats anything outside {0, 1, 2} as [`Verdict::Continue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Int(i64),
    /// Not an integer; carries the name of the value's type
    Invalid(&'static str),
}

impl CallbackResult {
    /// Resolve to a verdict, or to the diagnostic explaining the fallback
    pub fn validate(self) -> Result<Verdict, Diagnostic> {
        match self {
            CallbackResult::Int(raw) => {
                Verdict::from_raw(raw).ok_or(Diagnostic::InvalidVerdict { raw })
            }
            CallbackResult::Invalid(kind) => Err(Diagnostic::InvalidVerdictKind { kind }),
        }
    }
}

impl From<Verdict> for CallbackResult {
    fn from(verdict: Verdict) -> Self {
        CallbackResult::Int(verdict as i64)
    }
}

impl From<i32> for CallbackResult {
    fn from(raw: i32) -> Self {
        CallbackResult::Int(raw as i64)
    }
}

impl From<i64> for CallbackResult {
    fn from(raw: i64) -> Self {
        CallbackResult::Int(raw)
    }
}

impl From<f64> for CallbackResult {
    fn from(_: f64) -> Self {
        CallbackResult::Invalid("float")
    }
}

impl From<bool> for CallbackResult {
    fn from(_: bool) -> Self {
        CallbackResult::Invalid("bool")
    }
}

impl From<()> for CallbackResult {
    fn from(_: ()) -> Self {
        CallbackResult::Invalid("nil")
    }
}

/// Per-period processing routine, run on the hardware thread
///
/// Implementations must not block or allocate. Closures of the form
/// `|data: &mut CallbackData| -> impl Into<CallbackResult>` implement this
/// trait automatically.
pub trait AudioCallback: Send + 'static {
    fn process(&mut self, data: &mut CallbackData) -> CallbackResult;
}

impl<F, R> AudioCallback for F
where
    F: FnMut(&mut CallbackData) -> R + Send + 'static,
    R: Into<CallbackResult>,
{
    fn process(&mut self, data: &mut CallbackData) -> CallbackResult {
        self(data).into()
    }
}

/// Invoked once when a running stream stops, with its final context state
pub type FinishedCallback = Box<dyn Fn(&CallbackData) + Send + Sync + 'static>;
