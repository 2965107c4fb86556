/// 发布链路错误。
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("connect error: {0}")]
    Connect(String),
    #[error("publish error: {0}")]
    Publish(String),
}
