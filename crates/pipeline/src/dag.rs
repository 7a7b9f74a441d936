use crate::error::PipelineError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Component: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    async fn run(&self, input: Self::Input, ctx: &RunContext)
        -> Result<Self::Output, PipelineError>;

    /// Whether cancellation may drop this component mid-run. Components
    /// with external side effects return false and finish once started.
    fn interruptible(&self) -> bool {
        true
    }

    /// Recorded in the run result under this component's name
    fn summarize(&self, _output: &Self::Output) -> Value {
        Value::Null
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub elapsed_ms: u64,
    pub summary: Value,
}

/// Shared by every stage of one run
pub struct RunContext {
    cancel: CancellationToken,
    stages: Mutex<BTreeMap<String, StageReport>>,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            stages: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn record(&self, name: &str, report: StageReport) {
        match self.stages.lock() {
            Ok(mut stages) => {
                stages.insert(name.to_string(), report);
            }
            Err(_) => warn!(stage = name, "Stage report lost, context poisoned"),
        }
    }

    fn into_stages(self) -> BTreeMap<String, StageReport> {
        self.stages.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Output of the terminal stage plus a report for every stage that ran
#[derive(Debug, Clone, Serialize)]
pub struct RunResult<T> {
    pub output: T,
    pub stages: BTreeMap<String, StageReport>,
}

/// Components composed with `then` (output feeds input) and `join` (both
/// branches get a clone of the input and run concurrently)
#[async_trait]
pub trait Flow: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    async fn execute(&self, input: Self::Input, ctx: &RunContext)
        -> Result<Self::Output, PipelineError>;

    /// Names of every component in the flow, in declaration order
    fn names(&self) -> Vec<String>;
}

/// A single component lifted into a flow
pub struct Step<C>(pub C);

pub fn step<C: Component>(component: C) -> Step<C> {
    Step(component)
}

#[async_trait]
impl<C: Component> Flow for Step<C> {
    type Input = C::Input;
    type Output = C::Output;

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &RunContext,
    ) -> Result<Self::Output, PipelineError> {
        let name = self.0.name();
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        debug!(stage = name, "Stage started");
        let start = Instant::now();

        let run = self.0.run(input, ctx);
        let output = if self.0.interruptible() {
            // A result that is already ready wins over a concurrent cancel
            tokio::select! {
                biased;
                result = run => result?,
                _ = ctx.cancel.cancelled() => {
                    info!(stage = name, "Stage cancelled");
                    return Err(PipelineError::Cancelled);
                }
            }
        } else {
            run.await?
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(stage = name, elapsed_ms, "Stage finished");
        ctx.record(
            name,
            StageReport {
                elapsed_ms,
                summary: self.0.summarize(&output),
            },
        );

        Ok(output)
    }

    fn names(&self) -> Vec<String> {
        vec![self.0.name().to_string()]
    }
}

pub struct Then<A, B> {
    first: A,
    second: B,
}

#[async_trait]
impl<A, B> Flow for Then<A, B>
where
    A: Flow,
    B: Flow<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &RunContext,
    ) -> Result<Self::Output, PipelineError> {
        let middle = self.first.execute(input, ctx).await?;
        self.second.execute(middle, ctx).await
    }

    fn names(&self) -> Vec<String> {
        let mut names = self.first.names();
        names.extend(self.second.names());
        names
    }
}

pub struct Join<A, B> {
    left: A,
    right: B,
}

#[async_trait]
impl<A, B> Flow for Join<A, B>
where
    A: Flow,
    A::Input: Clone,
    B: Flow<Input = A::Input>,
{
    type Input = A::Input;
    type Output = (A::Output, B::Output);

    async fn execute(
        &self,
        input: Self::Input,
        ctx: &RunContext,
    ) -> Result<Self::Output, PipelineError> {
        tokio::try_join!(
            self.left.execute(input.clone(), ctx),
            self.right.execute(input, ctx)
        )
    }

    fn names(&self) -> Vec<String> {
        let mut names = self.left.names();
        names.extend(self.right.names());
        names
    }
}

pub trait FlowExt: Flow + Sized {
    fn then<B>(self, next: B) -> Then<Self, B>
    where
        B: Flow<Input = Self::Output>,
    {
        Then { first: self, second: next }
    }

    fn join<B>(self, other: B) -> Join<Self, B>
    where
        Self::Input: Clone,
        B: Flow<Input = Self::Input>,
    {
        Join { left: self, right: other }
    }
}

impl<F: Flow + Sized> FlowExt for F {}

/// A validated flow, ready to run
pub struct Pipeline<F> {
    flow: F,
}

impl<F: Flow> Pipeline<F> {
    pub fn new(flow: F) -> Result<Self, PipelineError> {
        let mut seen = HashSet::new();
        for name in flow.names() {
            if name.is_empty() {
                return Err(PipelineError::Graph("component with empty name".to_string()));
            }
            if !seen.insert(name.clone()) {
                return Err(PipelineError::Graph(format!("duplicate component name: {name}")));
            }
        }
        Ok(Self { flow })
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.flow.names()
    }

    pub async fn run(
        &self,
        input: F::Input,
        cancel: CancellationToken,
    ) -> Result<RunResult<F::Output>, PipelineError> {
        let ctx = RunContext::new(cancel);
        let output = self.flow.execute(input, &ctx).await?;
        Ok(RunResult {
            output,
            stages: ctx.into_stages(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    struct AddOne(&'static str);

    #[async_trait]
    impl Component for AddOne {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, input: i64, _ctx: &RunContext) -> Result<i64, PipelineError> {
            Ok(input + 1)
        }

        fn summarize(&self, output: &i64) -> Value {
            json!({ "value": output })
        }
    }

    struct Render;

    #[async_trait]
    impl Component for Render {
        type Input = (i64, i64);
        type Output = String;

        fn name(&self) -> &str {
            "render"
        }

        async fn run(&self, (a, b): (i64, i64), _ctx: &RunContext) -> Result<String, PipelineError> {
            Ok(format!("{a}/{b}"))
        }
    }

    /// Waits until its sibling branch reaches the same point
    struct Rendezvous(&'static str, Arc<Barrier>);

    #[async_trait]
    impl Component for Rendezvous {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, input: i64, _ctx: &RunContext) -> Result<i64, PipelineError> {
            self.1.wait().await;
            Ok(input)
        }
    }

    struct Hang;

    #[async_trait]
    impl Component for Hang {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &str {
            "hang"
        }

        async fn run(&self, input: i64, _ctx: &RunContext) -> Result<i64, PipelineError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(input)
        }
    }

    struct Fail;

    #[async_trait]
    impl Component for Fail {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &str {
            "fail"
        }

        async fn run(&self, _input: i64, _ctx: &RunContext) -> Result<i64, PipelineError> {
            Err(PipelineError::Graph("boom".to_string()))
        }
    }

    /// Cancels the run from inside, then completes
    struct CancelThenFinish;

    #[async_trait]
    impl Component for CancelThenFinish {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &str {
            "cancel_then_finish"
        }

        async fn run(&self, input: i64, ctx: &RunContext) -> Result<i64, PipelineError> {
            ctx.cancellation().cancel();
            Ok(input * 10)
        }
    }

    /// Sleeps, then finishes even when cancelled meanwhile
    struct Commit;

    #[async_trait]
    impl Component for Commit {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &str {
            "commit"
        }

        fn interruptible(&self) -> bool {
            false
        }

        async fn run(&self, input: i64, _ctx: &RunContext) -> Result<i64, PipelineError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_sequential_and_joined_stages() {
        let flow = step(AddOne("a"))
            .join(step(AddOne("b")).then(step(AddOne("c"))))
            .then(step(Render));
        let pipeline = Pipeline::new(flow).unwrap();

        let result = pipeline.run(1, CancellationToken::new()).await.unwrap();

        assert_eq!(result.output, "2/3");
        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c", "render"]);
        assert_eq!(result.stages.len(), 4);
        assert_eq!(result.stages["c"].summary, json!({ "value": 3 }));
        assert_eq!(result.stages["render"].summary, Value::Null);
    }

    #[tokio::test]
    async fn test_join_branches_run_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let flow = step(Rendezvous("left", barrier.clone()))
            .join(step(Rendezvous("right", barrier)))
            .then(step(Render));
        let pipeline = Pipeline::new(flow).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run(7, CancellationToken::new()),
        )
        .await
        .expect("join branches should not wait on each other")
        .unwrap();

        assert_eq!(result.output, "7/7");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let flow = step(AddOne("same")).then(step(AddOne("same")));
        assert!(matches!(Pipeline::new(flow), Err(PipelineError::Graph(_))));
    }

    #[tokio::test]
    async fn test_downstream_never_runs_after_failure() {
        let flow = step(Fail).then(step(AddOne("after")));
        let pipeline = Pipeline::new(flow).unwrap();

        let err = pipeline.run(0, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Graph(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let pipeline = Pipeline::new(step(AddOne("a"))).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline.run(0, cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_stage() {
        let pipeline = Pipeline::new(step(Hang).then(step(AddOne("after")))).unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), pipeline.run(0, cancel))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_finished_stage_beats_concurrent_cancel() {
        let pipeline = Pipeline::new(step(CancelThenFinish)).unwrap();
        let cancel = CancellationToken::new();

        let result = pipeline.run(4, cancel.clone()).await.unwrap();

        assert_eq!(result.output, 40);
        assert!(cancel.is_cancelled());
        assert!(result.stages.contains_key("cancel_then_finish"));
    }

    #[tokio::test]
    async fn test_uninterruptible_stage_reports_its_result() {
        let pipeline = Pipeline::new(step(Commit)).unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), pipeline.run(7, cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.output, 7);
    }

    #[tokio::test]
    async fn test_stage_after_cancel_does_not_start() {
        let pipeline = Pipeline::new(step(CancelThenFinish).then(step(AddOne("after")))).unwrap();

        let err = pipeline.run(1, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
