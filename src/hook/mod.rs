//! 观察者钩子
//!
//! 钩子是一个按注册顺序保存的异步观察者列表，调用时把参数分发给每个观察者。
//!
//! # 执行方式
//!
//! - [`HookMode::Concurrent`] - 所有观察者同时启动，全部结束后按注册顺序返回结果；
//!   任一失败则整次调用失败，错误中列出每一个失败的观察者。
//! - [`HookMode::Sequential`] - 逐个执行，遇到第一个失败即停止。
//!
//! [`Hook`] 总是给每个观察者一份独立的参数拷贝（`A: Clone`）。需要让观察者
//! 依次修改同一份参数时使用 [`MutableHook`]，它只有顺序执行一种方式，
//! 因此并发修改共享参数在类型上就无法表达。
//!
//! # 示例
//!
//! ```rust
//! use chips_boot::hook::{Hook, HookMode};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> chips_boot::Result<()> {
//! let hook: Hook<u32, u32> = Hook::new("double", HookMode::Concurrent);
//! let id = hook.tap(|n| async move { Ok(n * 2) });
//! hook.tap(|n| async move { Ok(n * 3) });
//!
//! assert_eq!(hook.invoke(5).await?, vec![10, 15]);
//!
//! hook.untap(id);
//! assert_eq!(hook.invoke(5).await?, vec![15]);
//! # Ok(())
//! # }
//! ```

mod mutable;

pub use mutable::MutableHook;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{join_all, BoxFuture};
use tokio::sync::oneshot;

use crate::module::ready::Outcome;
use crate::utils::{CoreError, Result};

/// 全局观察者 ID 计数器
static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// 观察者注册标识
///
/// `tap` 返回，`untap` 用它移除对应的那一次注册。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// 钩子执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookMode {
    /// 并发执行
    #[default]
    Concurrent,
    /// 顺序执行
    Sequential,
}

type Observer<A, R> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<R>> + Send + Sync>;

/// 一次性等待者列表
pub(crate) type Waiters<A> = Mutex<Vec<oneshot::Sender<Outcome<A>>>>;

/// 获取互斥锁，忽略中毒状态
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 注册一个一次性等待者，返回等待下一次调用的 future
pub(crate) fn register_waiter<A: Send + 'static>(
    waiters: &Waiters<A>,
    hook: &str,
) -> impl Future<Output = Outcome<A>> + Send + 'static {
    let (tx, rx) = oneshot::channel();
    lock(waiters).push(tx);
    let hook = hook.to_string();
    async move {
        rx.await.unwrap_or_else(|_| {
            Err(Arc::new(CoreError::Internal(format!(
                "钩子 '{}' 已释放，等待者不会被唤醒",
                hook
            ))))
        })
    }
}

/// 唤醒所有一次性等待者
pub(crate) fn resolve_waiters<A: Clone>(
    waiters: Vec<oneshot::Sender<Outcome<A>>>,
    hook: &str,
    args: &A,
    failures: Option<&Vec<Arc<CoreError>>>,
) {
    for tx in waiters {
        let outcome = match failures {
            None => Ok(args.clone()),
            Some(failures) => Err(Arc::new(CoreError::Hook {
                hook: hook.to_string(),
                failures: failures.clone(),
            })),
        };
        // 等待者可能已放弃等待
        let _ = tx.send(outcome);
    }
}

/// 观察者钩子
///
/// 每个观察者收到参数的独立拷贝，返回 `Result<R>`。
pub struct Hook<A, R = ()> {
    name: String,
    mode: HookMode,
    observers: Mutex<Vec<(ObserverId, Observer<A, R>)>>,
    waiters: Waiters<A>,
}

impl<A, R> fmt::Debug for Hook<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("observers", &lock(&self.observers).len())
            .field("waiters", &lock(&self.waiters).len())
            .finish()
    }
}

impl<A, R> Hook<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    /// 创建钩子
    pub fn new(name: impl Into<String>, mode: HookMode) -> Self {
        Self {
            name: name.into(),
            mode,
            observers: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// 创建并发钩子
    pub fn concurrent(name: impl Into<String>) -> Self {
        Self::new(name, HookMode::Concurrent)
    }

    /// 创建顺序钩子
    pub fn sequential(name: impl Into<String>) -> Self {
        Self::new(name, HookMode::Sequential)
    }

    /// 钩子名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 执行方式
    pub fn mode(&self) -> HookMode {
        self.mode
    }

    /// 注册观察者
    pub fn tap<F, Fut>(&self, observer: F) -> ObserverId
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let id = ObserverId::next();
        let observer: Observer<A, R> =
            Arc::new(move |args| Box::pin(observer(args)) as BoxFuture<'static, Result<R>>);
        lock(&self.observers).push((id, observer));
        id
    }

    /// 移除观察者
    ///
    /// 只移除对应的一次注册；未知 ID 不做任何事并返回 `false`。
    pub fn untap(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.observers);
        match observers.iter().position(|(oid, _)| *oid == id) {
            Some(index) => {
                observers.remove(index);
                true
            }
            None => false,
        }
    }

    /// 是否存在观察者（包括尚未触发的一次性等待者）
    pub fn has_observers(&self) -> bool {
        !lock(&self.observers).is_empty() || !lock(&self.waiters).is_empty()
    }

    /// 已注册的观察者数量
    pub fn len(&self) -> usize {
        lock(&self.observers).len()
    }

    /// 是否没有观察者
    pub fn is_empty(&self) -> bool {
        lock(&self.observers).is_empty()
    }

    /// 等待下一次调用
    ///
    /// 等待者在调用本方法时即完成注册，返回的 future 在下一次 `invoke`
    /// 结束后得到参数拷贝，或者得到该次调用的错误。
    pub fn on_invoke(&self) -> impl Future<Output = Outcome<A>> + Send + 'static {
        register_waiter(&self.waiters, &self.name)
    }

    /// 调用钩子
    ///
    /// 调用开始时对观察者列表做快照，调用过程中的注册与移除不影响本次调用。
    pub async fn invoke(&self, args: A) -> Result<Vec<R>> {
        let observers: Vec<Observer<A, R>> = lock(&self.observers)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        let waiters = std::mem::take(&mut *lock(&self.waiters));

        let outcome = match self.mode {
            HookMode::Concurrent => {
                let settled = join_all(observers.iter().map(|o| o(args.clone()))).await;
                let mut values = Vec::with_capacity(settled.len());
                let mut failures = Vec::new();
                for result in settled {
                    match result {
                        Ok(value) => values.push(value),
                        Err(e) => failures.push(Arc::new(e)),
                    }
                }
                if failures.is_empty() {
                    Ok(values)
                } else {
                    Err(failures)
                }
            }
            HookMode::Sequential => {
                let mut values = Vec::with_capacity(observers.len());
                let mut failure = None;
                for observer in &observers {
                    match observer(args.clone()).await {
                        Ok(value) => values.push(value),
                        Err(e) => {
                            failure = Some(vec![Arc::new(e)]);
                            break;
                        }
                    }
                }
                match failure {
                    None => Ok(values),
                    Some(failures) => Err(failures),
                }
            }
        };

        resolve_waiters(waiters, &self.name, &args, outcome.as_ref().err());

        outcome.map_err(|failures| CoreError::Hook {
            hook: self.name.clone(),
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_results_in_registration_order() {
        let hook: Hook<u64, u64> = Hook::concurrent("order");
        // 第一个观察者最慢，但结果仍排在第一位
        hook.tap(|n| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(n + 1)
        });
        hook.tap(|n| async move { Ok(n + 2) });
        hook.tap(|n| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(n + 3)
        });

        assert_eq!(hook.invoke(10).await.unwrap(), vec![11, 12, 13]);
    }

    #[tokio::test]
    async fn test_concurrent_observers_overlap() {
        let hook: Hook<()> = Hook::concurrent("overlap");
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let running = running.clone();
            let peak = peak.clone();
            hook.tap(move |_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        hook.invoke(()).await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_collects_every_failure() {
        let hook: Hook<()> = Hook::concurrent("failing");
        let finished = Arc::new(AtomicUsize::new(0));

        hook.tap(|_| async { Err(CoreError::Internal("first".into())) });
        let f = finished.clone();
        hook.tap(move |_| {
            let f = f.clone();
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        hook.tap(|_| async { Err(CoreError::Internal("second".into())) });

        let err = hook.invoke(()).await.unwrap_err();
        match err {
            CoreError::Hook { hook, failures } => {
                assert_eq!(hook, "failing");
                assert_eq!(failures.len(), 2);
                assert!(failures[0].to_string().contains("first"));
                assert!(failures[1].to_string().contains("second"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // 其他观察者照常执行完毕
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let hook: Hook<()> = Hook::sequential("series");
        let calls = Arc::new(Mutex::new(Vec::new()));

        for (i, fail) in [(1, false), (2, true), (3, false)] {
            let calls = calls.clone();
            hook.tap(move |_| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(i);
                    if fail {
                        Err(CoreError::Internal(format!("observer {i}")))
                    } else {
                        Ok(())
                    }
                }
            });
        }

        assert!(hook.invoke(()).await.is_err());
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_sequential_copies_do_not_leak() {
        let hook: Hook<Vec<String>, usize> = Hook::sequential("copies");
        hook.tap(|mut items| async move {
            items.push("changed".to_string());
            Ok(items.len())
        });
        hook.tap(|items| async move { Ok(items.len()) });

        let original = vec!["a".to_string()];
        let lens = hook.invoke(original.clone()).await.unwrap();
        assert_eq!(lens, vec![2, 1]);
        assert_eq!(original, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_untap_removes_single_registration() {
        let hook: Hook<()> = Hook::concurrent("untap");
        let count = Arc::new(AtomicUsize::new(0));
        let make = |count: Arc<AtomicUsize>| {
            move |_| {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };
        let first = hook.tap(make(count.clone()));
        hook.tap(make(count.clone()));

        assert!(hook.untap(first));
        assert!(!hook.untap(first));
        hook.invoke(()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_invoke_resolves_once() {
        let hook: Hook<&'static str> = Hook::concurrent("once");
        let waiter = hook.on_invoke();
        assert!(hook.has_observers());

        hook.invoke("first").await.unwrap();
        assert_eq!(waiter.await.unwrap(), "first");
        // 一次性等待者触发后即被移除
        assert!(!hook.has_observers());

        let later = hook.on_invoke();
        hook.invoke("second").await.unwrap();
        assert_eq!(later.await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_on_invoke_receives_failure() {
        let hook: Hook<()> = Hook::sequential("fails");
        hook.tap(|_| async { Err(CoreError::Internal("nope".into())) });
        let waiter = hook.on_invoke();

        assert!(hook.invoke(()).await.is_err());
        let err = waiter.await.unwrap_err();
        assert!(matches!(*err, CoreError::Hook { .. }));
    }

    #[tokio::test]
    async fn test_invoke_without_observers() {
        let hook: Hook<u8, u8> = Hook::new("empty", HookMode::default());
        assert!(!hook.has_observers());
        assert!(hook.invoke(1).await.unwrap().is_empty());
    }
}
