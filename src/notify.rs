//! Outbound SMS notifications, simulation layer.
//!
//! Messages are written to the log instead of a real gateway; swap the
//! body of [`send_sms`] for a provider client to go live.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::models::Role;

/// Delivers one SMS (simulated). Numbers shorter than 10 characters are
/// dropped with a warning instead of failing the caller.
pub fn send_sms(to: &str, message: &str) {
    if to.trim().len() < 10 {
        warn!(to, "sms dropped: invalid phone number");
        return;
    }
    info!(to, %message, "sms sent (simulated)");
}

/// Welcome message for a freshly pre-registered account.
pub fn send_welcome_sms(phone_number: &str, first_name: Option<&str>, email: &str, role: Role) {
    send_sms(phone_number, &welcome_message(first_name, email, role));
}

/// Pickup notification once an order reaches ready for delivery.
pub fn send_order_ready_sms(
    phone_number: &str,
    customer_name: Option<&str>,
    order_id: i32,
    total_amount: Decimal,
) {
    send_sms(
        phone_number,
        &order_ready_message(customer_name, order_id, total_amount),
    );
}

fn greeting(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("Hello {name}"),
        None => "Hello".to_string(),
    }
}

fn welcome_message(first_name: Option<&str>, email: &str, role: Role) -> String {
    format!(
        "{greeting}! You have been registered at the Cupcake Shop as {role}.\n\
         Email: {email}\n\
         Sign in with your provider account to get started.\n\
         - The Cupcake Shop team",
        greeting = greeting(first_name),
        role = role.as_str(),
    )
}

fn order_ready_message(customer_name: Option<&str>, order_id: i32, total_amount: Decimal) -> String {
    format!(
        "{greeting}! Your order #{order_id} is READY FOR DELIVERY.\n\
         Total: ${total_amount}\n\
         Thank you for your purchase!\n\
         - The Cupcake Shop team",
        greeting = greeting(customer_name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_handles_missing_name() {
        assert_eq!(greeting(Some("Ana")), "Hello Ana");
        assert_eq!(greeting(None), "Hello");
    }

    #[test]
    fn order_ready_message_includes_order_and_total() {
        let message = order_ready_message(Some("Ana"), 42, Decimal::new(1050, 2));
        assert!(message.contains("order #42"));
        assert!(message.contains("$10.50"));
    }
}
