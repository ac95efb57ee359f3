//! Notification messages and dispatchers
//!
//! The ledger tells owners and the admin about top-up events but never
//! delivers anything itself. A [`Notifier`] hands each [`Notification`] to
//! whatever delivery layer is wired in (chat bot, WhatsApp gateway); a
//! failure there is logged and never affects the ledger operation.

use tokio::sync::mpsc;

use crate::core::traits::Notifier;
use crate::types::{Amount, OwnerId, Transaction};

/// Who should receive a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Owner(OwnerId),
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: Recipient,
    pub text: String,
}

impl Notification {
    pub fn owner(owner: OwnerId, text: impl Into<String>) -> Self {
        Self {
            recipient: Recipient::Owner(owner),
            text: text.into(),
        }
    }

    pub fn admin(text: impl Into<String>) -> Self {
        Self {
            recipient: Recipient::Admin,
            text: text.into(),
        }
    }
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn dispatch(&self, notification: Notification) -> Result<(), String> {
        match notification.recipient {
            Recipient::Owner(owner) => {
                tracing::info!(owner, text = %notification.text, "notify owner")
            }
            Recipient::Admin => tracing::info!(text = %notification.text, "notify admin"),
        }
        Ok(())
    }
}

/// Queues notifications on an unbounded channel for a delivery task
///
/// Sending never blocks; it only fails once the receiving side is gone.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn dispatch(&self, notification: Notification) -> Result<(), String> {
        self.sender
            .send(notification)
            .map_err(|_| "notification receiver dropped".to_string())
    }
}

/// Format an amount as Rupiah with `.` thousands separators (`Rp 50.000`)
pub fn format_rupiah(amount: Amount) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }
    if amount < 0 {
        format!("-Rp {}", grouped)
    } else {
        format!("Rp {}", grouped)
    }
}

pub(crate) fn topup_requested(tx: &Transaction) -> String {
    format!(
        "TOPUP APPROVAL NEEDED\nTransaction: {}\nUser: {} ({})\nAmount: {}\nMethod: QRIS\nExpires: {}",
        tx.id,
        tx.display_name,
        tx.owner,
        format_rupiah(tx.amount),
        tx.expires_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

pub(crate) fn topup_confirmed(tx: &Transaction, note: Option<&str>) -> String {
    let mut text = format!(
        "Top-up {} of {} was confirmed and added to your balance.",
        tx.id,
        format_rupiah(tx.amount)
    );
    if let Some(note) = note {
        text.push_str(&format!("\nAdmin note: {}", note));
    }
    text
}

pub(crate) fn topup_rejected(tx: &Transaction, reason: Option<&str>) -> String {
    let mut text = format!(
        "Your top-up of {} ({}) was rejected.",
        format_rupiah(tx.amount),
        tx.id
    );
    if let Some(reason) = reason {
        text.push_str(&format!(" Reason: {}", reason));
    }
    text
}

pub(crate) fn system_error(owner: OwnerId, operation: &str, details: &str) -> String {
    format!(
        "SYSTEM ERROR ALERT\nUser ID: {}\nOperation: {}\nError: {}\nAction required: please investigate.",
        owner, operation, details
    )
}
