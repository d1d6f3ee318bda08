//! 就绪信号
//!
//! [`ReadySignal`] 是一次性的完成信号：第一次 `complete` 记录结果，之后的调用
//! 全部忽略；任意数量的等待者都能拿到同一份结果，包括在完成之后才开始等待的。
//!
//! 信号不支持取消，需要超时的调用方自行包一层 `tokio::time::timeout`。

use std::sync::Arc;

use tokio::sync::watch;

use crate::utils::CoreError;

/// 信号结果：错误使用 `Arc` 共享，以便分发给多个等待者
pub type Outcome<T> = std::result::Result<T, Arc<CoreError>>;

/// 一次性、多等待者的完成信号
///
/// ```rust
/// use chips_boot::module::ReadySignal;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let signal = ReadySignal::new();
/// assert!(signal.complete(Ok(7)));
/// assert!(!signal.complete(Ok(8)));
/// assert_eq!(signal.wait().await.unwrap(), 7);
/// # }
/// ```
#[derive(Debug)]
pub struct ReadySignal<T> {
    tx: Arc<watch::Sender<Option<Outcome<T>>>>,
}

impl<T> Clone for ReadySignal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> Default for ReadySignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ReadySignal<T> {
    /// 创建一个未完成的信号
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// 记录结果
    ///
    /// 返回 `true` 表示本次调用完成了信号；信号已完成时返回 `false`，结果保持不变。
    pub fn complete(&self, outcome: Outcome<T>) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    /// 是否已完成
    pub fn is_complete(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// 读取当前结果，不等待
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.tx.borrow().clone()
    }

    /// 等待结果
    ///
    /// 已完成时立即返回，否则挂起直到 `complete` 被调用。
    pub async fn wait(&self) -> Outcome<T> {
        let mut rx = self.tx.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(Arc::new(CoreError::Internal("就绪信号已关闭".to_string()))))
    }
}
