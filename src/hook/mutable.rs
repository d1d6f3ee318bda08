//! 共享可变参数的顺序钩子

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use super::{lock, register_waiter, resolve_waiters, ObserverId, Waiters};
use crate::module::ready::Outcome;
use crate::utils::{CoreError, Result};

type MutObserver<A> = Arc<dyn for<'a> Fn(&'a mut A) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// 共享可变参数的钩子
///
/// 观察者逐个执行，每个观察者拿到同一份参数的可变引用，前一个观察者的修改
/// 对后面的观察者和调用方都可见。遇到第一个失败即停止。
///
/// ```rust
/// use chips_boot::hook::MutableHook;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> chips_boot::Result<()> {
/// let hook: MutableHook<Vec<&'static str>> = MutableHook::new("pipeline");
/// hook.tap(|items| Box::pin(async move {
///     items.push("a");
///     Ok(())
/// }));
/// hook.tap(|items| Box::pin(async move {
///     items.push("b");
///     Ok(())
/// }));
///
/// let mut items = Vec::new();
/// hook.invoke(&mut items).await?;
/// assert_eq!(items, vec!["a", "b"]);
/// # Ok(())
/// # }
/// ```
pub struct MutableHook<A> {
    name: String,
    observers: Mutex<Vec<(ObserverId, MutObserver<A>)>>,
    waiters: Waiters<A>,
}

impl<A> fmt::Debug for MutableHook<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableHook")
            .field("name", &self.name)
            .field("observers", &lock(&self.observers).len())
            .finish()
    }
}

impl<A> MutableHook<A>
where
    A: Clone + Send + 'static,
{
    /// 创建钩子
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            observers: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// 钩子名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 注册观察者
    pub fn tap<F>(&self, observer: F) -> ObserverId
    where
        F: for<'a> Fn(&'a mut A) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        let id = ObserverId::next();
        lock(&self.observers).push((id, Arc::new(observer)));
        id
    }

    /// 移除观察者，未知 ID 返回 `false`
    pub fn untap(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// 是否存在观察者（包括一次性等待者）
    pub fn has_observers(&self) -> bool {
        !lock(&self.observers).is_empty() || !lock(&self.waiters).is_empty()
    }

    /// 等待下一次调用，得到调用结束时参数的拷贝
    pub fn on_invoke(&self) -> impl Future<Output = Outcome<A>> + Send + 'static {
        register_waiter(&self.waiters, &self.name)
    }

    /// 调用钩子
    pub async fn invoke(&self, args: &mut A) -> Result<()> {
        let observers: Vec<MutObserver<A>> = lock(&self.observers)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        let waiters = std::mem::take(&mut *lock(&self.waiters));

        let mut failures = None;
        for observer in &observers {
            if let Err(e) = observer(&mut *args).await {
                failures = Some(vec![Arc::new(e)]);
                break;
            }
        }

        resolve_waiters(waiters, &self.name, &*args, failures.as_ref());

        match failures {
            None => Ok(()),
            Some(failures) => Err(CoreError::Hook {
                hook: self.name.clone(),
                failures,
            }),
        }
    }
}
