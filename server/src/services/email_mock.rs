// quire_server/src/services/email_mock.rs
use async_trait::async_trait;
use quire::model::{Order, Payment};
use quire::Notifier;
use tracing::info;
use uuid::Uuid;

#[derive(Debug)]
pub struct SentEmailInfo {
  pub to: String,
  pub from: String,
  pub subject: String,
  pub body_preview: String,
  pub message_id: String,
}

pub async fn send_mock_email(to: &str, from: &str, subject: &str, body: &str) -> anyhow::Result<SentEmailInfo> {
  info!("Simulating sending email: To='{}', From='{}', Subject='{}'", to, from, subject);
  tokio::time::sleep(std::time::Duration::from_millis(20)).await;

  // Addresses on the reserved test domain bounce.
  if to.to_lowercase().ends_with("@fail.test") {
    tracing::warn!("Simulated email failure for recipient: {}", to);
    anyhow::bail!("Simulated email send failure");
  }

  let body_preview = body.chars().take(50).collect::<String>() + "...";
  let message_id = format!("mock_email_{}", Uuid::new_v4());
  info!("Mock email sent successfully. Message ID: {}", message_id);

  Ok(SentEmailInfo {
    to: to.to_string(),
    from: from.to_string(),
    subject: subject.to_string(),
    body_preview,
    message_id,
  })
}

/// Notifier that "sends" through [`send_mock_email`] and logs the result.
#[derive(Debug, Clone)]
pub struct LogNotifier {
  sender: String,
}

impl LogNotifier {
  pub fn new(sender: impl Into<String>) -> Self {
    Self { sender: sender.into() }
  }
}

#[async_trait]
impl Notifier for LogNotifier {
  async fn send_order_confirmation(&self, order: &Order) -> anyhow::Result<()> {
    let subject = format!("Your order {} is confirmed", order.id);
    let lines = order
      .line_items
      .iter()
      .map(|line| format!("{} x {} ({} {})", line.quantity, line.title, line.line_total, order.currency))
      .collect::<Vec<_>>()
      .join("\n");
    let body = format!(
      "Hi {},\n\nThanks for your order.\n\n{}\n\nTotal: {} {}",
      order.customer.name, lines, order.total, order.currency
    );
    let sent = send_mock_email(&order.customer.email, &self.sender, &subject, &body).await?;
    info!(order_id = %order.id, message_id = %sent.message_id, "Order confirmation sent");
    Ok(())
  }

  async fn send_payment_status(&self, order_id: Uuid, payment: &Payment) -> anyhow::Result<()> {
    info!(
      %order_id,
      transaction_id = %payment.transaction_id,
      status = %payment.status,
      "Payment status notification recorded"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn fail_domain_bounces() {
    assert!(send_mock_email("reader@fail.test", "shop@quire.local", "Hello", "body").await.is_err());
    let sent = send_mock_email("reader@example.com", "shop@quire.local", "Hello", "body").await.unwrap();
    assert_eq!(sent.to, "reader@example.com");
    assert!(sent.message_id.starts_with("mock_email_"));
  }
}
