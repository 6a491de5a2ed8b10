//! 通知发送 (Telegram / 日志)

use std::time::Duration;

use tracing::info;

use crate::error::{Result, SentinelError};

/// 通知通道
///
/// 只在 notifier 线程中调用, 允许阻塞 (网络请求), 但必须自带超时.
pub trait NotificationTransport: Send {
    fn name(&self) -> &str;

    fn send(&self, text: &str) -> Result<()>;
}

// ========== Telegram ==========

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram 机器人通知
pub struct TelegramTransport {
    api_url: String,
    chat_id: String,
    agent: ureq::Agent,
}

impl TelegramTransport {
    pub fn new(bot_token: &str, chat_id: &str, timeout: Duration) -> Result<Self> {
        if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
            return Err(SentinelError::Config(
                "telegram bot token and chat id must not be empty".to_string(),
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            api_url: format!("{}/bot{}/sendMessage", TELEGRAM_API, bot_token.trim()),
            chat_id: chat_id.trim().to_string(),
            agent,
        })
    }
}

impl NotificationTransport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    fn send(&self, text: &str) -> Result<()> {
        self.agent
            .post(&self.api_url)
            .send_form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .map_err(|e| match e {
                // 不把带 token 的 URL 写进日志
                ureq::Error::Status(code, _) => {
                    SentinelError::Notify(format!("telegram responded with HTTP {}", code))
                }
                ureq::Error::Transport(t) => {
                    SentinelError::Notify(format!("telegram transport error: {}", t.kind()))
                }
            })?;
        Ok(())
    }
}

// ========== 日志 ==========

/// 未配置机器人时使用: 只写日志
#[derive(Default)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&self, text: &str) -> Result<()> {
        info!(target: "notification", "📣 {}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telegram_requires_credentials() {
        assert!(TelegramTransport::new("", "123", Duration::from_secs(5)).is_err());
        assert!(TelegramTransport::new("abc", " ", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_telegram_url() {
        let t = TelegramTransport::new(" token ", "42", Duration::from_secs(5)).unwrap();
        assert_eq!(t.api_url, "https://api.telegram.org/bottoken/sendMessage");
        assert_eq!(t.chat_id, "42");
        assert_eq!(t.name(), "telegram");
    }

    #[test]
    fn test_http_failure_is_notify_error_without_token() {
        // 绑定后立即释放端口, 连接会被拒绝
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut t = TelegramTransport::new("secret-token", "42", Duration::from_secs(2)).unwrap();
        t.api_url = format!("http://127.0.0.1:{}/botsecret-token/sendMessage", port);

        let err = t.send("hello").unwrap_err();
        assert!(matches!(err, SentinelError::Notify(_)), "{:?}", err);
        assert!(!err.to_string().contains("secret-token"));
    }

    #[test]
    fn test_log_transport_never_fails() {
        assert!(LogTransport.send("Camera 0: Person 1 ENTERED frame. Total people: 1").is_ok());
    }
}
