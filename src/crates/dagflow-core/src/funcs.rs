//! Minimal built-in function implementations
//!
//! The full library of built-ins lives outside the engine; these are the
//! small adapters the engine's own tests and examples exercise:
//!
//! - [`SimpleFunc`] wraps a typed pure closure as a complete [`Func`].
//! - [`ConstFunc`] is a one-value source.
//! - [`IntervalFunc`] is a monotonic timer source.

use crate::error::{EngineError, Result};
use crate::node::{Func, FuncInfo, StreamCtx};
use crate::types::{FuncType, Type};
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The callable wrapped by [`SimpleFunc`]: arguments arrive in parameter
/// order.
pub type SimpleBody = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A pure function lifted into the node contract.
///
/// With parameters it is a transformer: each input snapshot is unpacked in
/// parameter order and the closure applied. A snapshot equal to the previous
/// one is skipped without recomputation; a fresh snapshot always produces an
/// emission, and the engine-level debounce absorbs outputs that happen to be
/// unchanged. With no parameters it is a one-shot source that emits a single
/// value and then parks until cancelled. Speculative calls are always
/// supported.
pub struct SimpleFunc {
    sig: FuncType,
    body: SimpleBody,
}

impl SimpleFunc {
    pub fn new(sig: FuncType, body: SimpleBody) -> Self {
        Self { sig, body }
    }

    fn unpack(&self, snapshot: &Value) -> Result<Vec<Value>> {
        let fields = snapshot
            .as_struct()
            .ok_or_else(|| EngineError::value("input snapshot is not a struct"))?;
        self.sig
            .params
            .iter()
            .map(|(name, _)| {
                fields
                    .field(name)
                    .cloned()
                    .ok_or_else(|| EngineError::value(format!("snapshot missing field '{}'", name)))
            })
            .collect()
    }
}

#[async_trait]
impl Func for SimpleFunc {
    fn info(&self) -> FuncInfo {
        FuncInfo::pure(self.sig.clone())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        if self.sig.params.is_empty() {
            let value = (self.body)(&[])?;
            ctx.send(value).await?;
            ctx.shutdown.cancelled().await;
            return Ok(());
        }

        let mut last: Option<Value> = None;
        while let Some(snapshot) = ctx.next_input().await {
            if last.as_ref() == Some(&snapshot) {
                continue;
            }
            let args = self.unpack(&snapshot)?;
            last = Some(snapshot);
            let out = (self.body)(&args)?;
            ctx.send(out).await?;
        }
        Ok(())
    }

    async fn call(&self, args: &[Value]) -> Result<Value> {
        if args.len() != self.sig.params.len() {
            return Err(EngineError::value(format!(
                "expected {} args, got {}",
                self.sig.params.len(),
                args.len()
            )));
        }
        (self.body)(args)
    }
}

/// A source that emits one fixed value and then waits for cancellation.
pub struct ConstFunc {
    value: Value,
}

impl ConstFunc {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait]
impl Func for ConstFunc {
    fn info(&self) -> FuncInfo {
        FuncInfo::pure(FuncType::new(vec![], self.value.type_of()))
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        ctx.send(self.value.clone()).await?;
        ctx.shutdown.cancelled().await;
        Ok(())
    }

    async fn call(&self, _args: &[Value]) -> Result<Value> {
        Ok(self.value.clone())
    }
}

/// A timer source that emits 0, 1, 2, ... once per period.
///
/// The first value is emitted immediately so downstream consumers can load.
pub struct IntervalFunc {
    period: Duration,
}

impl IntervalFunc {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

#[async_trait]
impl Func for IntervalFunc {
    fn info(&self) -> FuncInfo {
        // Not pure: output depends on time, and never memoizable.
        FuncInfo::new(FuncType::new(vec![], Type::Int))
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        let mut timer = tokio::time::interval(self.period);
        let mut n: i64 = 0;
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = ctx.shutdown.cancelled() => return Ok(()),
            }
            ctx.send(Value::Int(n)).await?;
            n += 1;
        }
    }
}

/// Epoch seconds to lowercase weekday name, the classic clock-derived
/// transformer. The parameter is named `a`.
pub fn weekday() -> SimpleFunc {
    let sig = FuncType::new(vec![("a".to_string(), Type::Int)], Type::Str);
    SimpleFunc::new(
        sig,
        Arc::new(|args| {
            let secs = args[0]
                .as_int()
                .ok_or_else(|| EngineError::value("weekday wants an int"))?;
            let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| EngineError::value(format!("timestamp {} out of range", secs)))?;
            Ok(Value::str(dt.format("%A").to_string().to_lowercase()))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ShutdownHandle;
    use tokio::sync::mpsc;

    fn ctx_pair(
        handle: &ShutdownHandle,
    ) -> (StreamCtx, mpsc::Sender<Value>, mpsc::Receiver<Value>) {
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, out_rx) = mpsc::channel(1);
        (StreamCtx::new(in_rx, out_tx, handle.token()), in_tx, out_rx)
    }

    #[tokio::test]
    async fn test_transformer_suppresses_duplicates() {
        let sig = FuncType::new(vec![("a".to_string(), Type::Int)], Type::Int);
        let mut func = SimpleFunc::new(sig, Arc::new(|args| Ok(args[0].clone())));

        let handle = ShutdownHandle::new();
        let (ctx, in_tx, mut out_rx) = ctx_pair(&handle);
        let body = tokio::spawn(async move { func.stream(ctx).await });

        for v in [5, 5, 5, 7] {
            in_tx
                .send(Value::struct_of(vec![("a".to_string(), Value::Int(v))]))
                .await
                .unwrap();
        }
        drop(in_tx);

        assert_eq!(out_rx.recv().await, Some(Value::Int(5)));
        assert_eq!(out_rx.recv().await, Some(Value::Int(7)));
        assert_eq!(out_rx.recv().await, None, "output closes when body returns");
        body.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_zero_param_simple_func_is_a_source() {
        let sig = FuncType::new(vec![], Type::Str);
        let mut func = SimpleFunc::new(sig, Arc::new(|_| Ok(Value::str("hello"))));

        let handle = ShutdownHandle::new();
        let (ctx, _in_tx, mut out_rx) = ctx_pair(&handle);
        let body = tokio::spawn(async move { func.stream(ctx).await });

        assert_eq!(out_rx.recv().await, Some(Value::str("hello")));
        handle.cancel();
        assert_eq!(out_rx.recv().await, None);
        body.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_const_func_call_speculates() {
        let func = ConstFunc::new(Value::Int(9));
        assert_eq!(func.call(&[]).await.unwrap(), Value::Int(9));
        assert!(func.info().spec);
    }

    #[tokio::test]
    async fn test_simple_func_call_checks_arity() {
        let sig = FuncType::new(vec![("a".to_string(), Type::Int)], Type::Int);
        let func = SimpleFunc::new(sig, Arc::new(|args| Ok(args[0].clone())));
        assert!(func.call(&[]).await.is_err());
        assert_eq!(func.call(&[Value::Int(3)]).await.unwrap(), Value::Int(3));
    }

    #[tokio::test]
    async fn test_weekday_of_epoch_zero() {
        // 1970-01-01 was a Thursday.
        let func = weekday();
        assert_eq!(
            func.call(&[Value::Int(0)]).await.unwrap(),
            Value::str("thursday")
        );
        assert_eq!(
            func.call(&[Value::Int(86_400)]).await.unwrap(),
            Value::str("friday")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_func_counts_up() {
        let mut func = IntervalFunc::new(Duration::from_secs(1));
        let handle = ShutdownHandle::new();
        let (ctx, _in_tx, mut out_rx) = ctx_pair(&handle);
        let body = tokio::spawn(async move { func.stream(ctx).await });

        assert_eq!(out_rx.recv().await, Some(Value::Int(0)));
        assert_eq!(out_rx.recv().await, Some(Value::Int(1)));
        handle.cancel();
        assert_eq!(out_rx.recv().await, None);
        body.await.unwrap().unwrap();
    }
}
