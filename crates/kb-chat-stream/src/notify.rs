/// Capability the session calls when the backend reports that the account
/// has run out of AI points.
///
/// Implementations are shared process-wide (for example a UI store that
/// opens a top-up dialog); the session only invokes them.
pub trait BalanceNotifier: Send + Sync {
    fn notify_insufficient_balance(&self);
}

/// Notifier that ignores the signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBalanceNotifier;

impl BalanceNotifier for NoopBalanceNotifier {
    fn notify_insufficient_balance(&self) {}
}
