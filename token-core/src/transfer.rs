//! Transfer engine
//!
//! [`prepare_transfer`] validates a transfer and computes everything it
//! would change without mutating anything. The caller commits the result
//! or drops it; there is no partially applied transfer.
//!
//! Order of checks:
//! 1. sender balance covers the value (`InsufficientBalance`)
//! 2. debit and credit are staged, `Transfer` is staged
//! 3. recipient class is resolved:
//!    - plain: done
//!    - non-accepting: `RecipientCannotReceive`
//!    - accepting: handler runs; a revert or a panic is
//!      `NotificationHandlerFailure`

use crate::recipient::{
    NotificationContext, RecipientDirectory, RecipientKind, Revert, TokenReceiver,
};
use crate::token::Token;
use crate::types::{AccountId, Amount, EventKind, EventRecord, PendingEvent};
use crate::{Error, Result};
use std::panic::{self, AssertUnwindSafe};

/// Parameters of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Token being moved
    pub token: AccountId,
    /// Sender (already authenticated caller)
    pub from: AccountId,
    /// Recipient
    pub to: AccountId,
    /// Raw amount
    pub value: Amount,
    /// Auxiliary data forwarded to accepting recipients
    pub data: Vec<u8>,
}

impl TransferRequest {
    /// Transfer without auxiliary data
    pub fn new(token: AccountId, from: AccountId, to: AccountId, value: Amount) -> Self {
        Self {
            token,
            from,
            to,
            value,
            data: Vec::new(),
        }
    }

    /// Attach auxiliary data
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }
}

/// Validated, uncommitted transfer
#[derive(Debug, Clone)]
pub struct StagedTransfer {
    /// Final balances of the touched accounts
    pub writes: Vec<(AccountId, Amount)>,
    /// `Transfer` followed by any records the recipient emitted
    pub events: Vec<PendingEvent>,
    /// Whether a receive handler ran
    pub notified: bool,
}

/// Outcome of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// The `Transfer` record
    pub transfer: EventRecord,
    /// Records emitted by the recipient's handler
    pub notifications: Vec<EventRecord>,
}

impl TransferReceipt {
    /// Split committed records into the transfer and its notifications
    pub(crate) fn from_records(mut records: Vec<EventRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::InvariantViolation(
                "transfer committed without a Transfer record".to_string(),
            ));
        }
        let notifications = records.split_off(1);
        let transfer = records.remove(0);
        Ok(Self {
            transfer,
            notifications,
        })
    }
}

/// Validate a transfer and compute its effects
pub fn prepare_transfer(
    token: &Token,
    directory: &RecipientDirectory,
    request: &TransferRequest,
) -> Result<StagedTransfer> {
    let TransferRequest {
        from,
        to,
        value,
        ref data,
        ..
    } = *request;

    let mut staged = token.balances().stage();
    staged.debit(from, value)?;
    staged.credit(to, value)?;

    let mut events = vec![PendingEvent {
        emitter: token.address(),
        kind: EventKind::Transfer { from, to, value },
    }];

    let notified = match directory.resolve(&to) {
        RecipientKind::Plain => false,
        RecipientKind::NonAccepting => {
            tracing::debug!(token = %token.address(), recipient = %to, "Recipient has no receive handler");
            return Err(Error::RecipientCannotReceive(to));
        }
        RecipientKind::Accepting(receiver) => {
            let mut ctx = NotificationContext::new(token.address(), to);
            invoke_receiver(receiver.as_ref(), &mut ctx, from, value, data)
                .map_err(|revert| {
                    tracing::debug!(
                        token = %token.address(),
                        recipient = %to,
                        reason = %revert.reason,
                        "Receive handler reverted"
                    );
                    Error::NotificationHandlerFailure {
                        recipient: to,
                        reason: revert.reason,
                    }
                })?;
            events.extend(ctx.into_events());
            true
        }
    };

    Ok(StagedTransfer {
        writes: staged.into_writes(),
        events,
        notified,
    })
}

/// Run a receive handler, turning a panic into a revert
fn invoke_receiver(
    receiver: &dyn TokenReceiver,
    ctx: &mut NotificationContext,
    from: AccountId,
    value: Amount,
    data: &[u8],
) -> std::result::Result<(), Revert> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        receiver.on_token_received(ctx, from, value, data)
    }))
    .unwrap_or_else(|payload| {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Err(Revert::new(format!("receive handler panicked: {}", message)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::{CallRecorder, RejectingReceiver};
    use crate::registry::TokenRegistry;
    use std::sync::Arc;

    fn funded_token(holder: AccountId, amount: Amount) -> Token {
        let registry = TokenRegistry::new(
            AccountId::random(),
            holder,
            "Asset Token",
            "CLR",
            0,
            amount,
        )
        .unwrap();
        let mut token = Token::new(registry);
        token.balances_mut().set(holder, amount);
        token
    }

    #[test]
    fn test_plain_transfer() {
        let sender = AccountId::random();
        let recipient = AccountId::random();
        let token = funded_token(sender, 100);

        let staged = prepare_transfer(
            &token,
            &RecipientDirectory::new(),
            &TransferRequest::new(token.address(), sender, recipient, 50),
        )
        .unwrap();

        assert_eq!(staged.writes, vec![(sender, 50), (recipient, 50)]);
        assert!(!staged.notified);
        assert_eq!(staged.events.len(), 1);
        assert_eq!(
            staged.events[0].kind,
            EventKind::Transfer {
                from: sender,
                to: recipient,
                value: 50
            }
        );
        // Nothing applied
        assert_eq!(token.balance_of(&sender), 100);
    }

    #[test]
    fn test_overdraft_rejected() {
        let sender = AccountId::random();
        let token = funded_token(sender, 100);

        let err = prepare_transfer(
            &token,
            &RecipientDirectory::new(),
            &TransferRequest::new(token.address(), sender, AccountId::random(), 150),
        )
        .unwrap_err();

        assert!(matches!(err, Error::InsufficientBalance { have: 100, need: 150 }));
    }

    #[test]
    fn test_accepting_recipient_is_notified() {
        let sender = AccountId::random();
        let receiver = AccountId::random();
        let token = funded_token(sender, 100);

        let mut directory = RecipientDirectory::new();
        directory.register_receiver(receiver, Arc::new(CallRecorder));

        let staged = prepare_transfer(
            &token,
            &directory,
            &TransferRequest::new(token.address(), sender, receiver, 50).with_data(b"hi".to_vec()),
        )
        .unwrap();

        assert!(staged.notified);
        assert_eq!(staged.events.len(), 2);
        assert_eq!(staged.events[1].emitter, receiver);
        assert_eq!(
            staged.events[1].kind,
            EventKind::Called {
                from: sender,
                data: b"hi".to_vec(),
                value: 50
            }
        );
    }

    #[test]
    fn test_non_accepting_recipient_rejected() {
        let sender = AccountId::random();
        let sink = AccountId::random();
        let token = funded_token(sender, 100);

        let mut directory = RecipientDirectory::new();
        directory.register_non_accepting(sink);

        let err = prepare_transfer(
            &token,
            &directory,
            &TransferRequest::new(token.address(), sender, sink, 50),
        )
        .unwrap_err();

        assert!(matches!(err, Error::RecipientCannotReceive(account) if account == sink));
    }

    #[test]
    fn test_reverting_handler_propagates() {
        let sender = AccountId::random();
        let receiver = AccountId::random();
        let token = funded_token(sender, 100);

        let mut directory = RecipientDirectory::new();
        directory.register_receiver(receiver, Arc::new(RejectingReceiver::new("not today")));

        let err = prepare_transfer(
            &token,
            &directory,
            &TransferRequest::new(token.address(), sender, receiver, 50),
        )
        .unwrap_err();

        match err {
            Error::NotificationHandlerFailure { recipient, reason } => {
                assert_eq!(recipient, receiver);
                assert_eq!(reason, "not today");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_overdraft_checked_before_recipient_class() {
        let sender = AccountId::random();
        let sink = AccountId::random();
        let token = funded_token(sender, 10);

        let mut directory = RecipientDirectory::new();
        directory.register_non_accepting(sink);

        let err = prepare_transfer(
            &token,
            &directory,
            &TransferRequest::new(token.address(), sender, sink, 50),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
    }

    struct PanickingReceiver;

    impl TokenReceiver for PanickingReceiver {
        fn on_token_received(
            &self,
            ctx: &mut NotificationContext,
            from: AccountId,
            value: Amount,
            data: &[u8],
        ) -> std::result::Result<(), Revert> {
            ctx.emit_called(from, data, value);
            panic!("ledger full");
        }
    }

    #[test]
    fn test_panicking_handler_is_a_revert() {
        let sender = AccountId::random();
        let receiver = AccountId::random();
        let token = funded_token(sender, 100);

        let mut directory = RecipientDirectory::new();
        directory.register_receiver(receiver, Arc::new(PanickingReceiver));

        let err = prepare_transfer(
            &token,
            &directory,
            &TransferRequest::new(token.address(), sender, receiver, 50),
        )
        .unwrap_err();

        match err {
            Error::NotificationHandlerFailure { recipient, reason } => {
                assert_eq!(recipient, receiver);
                assert!(reason.contains("ledger full"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(token.balance_of(&sender), 100);
    }
}
