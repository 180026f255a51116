//! Policy evaluator: priority ordering, attribute enrichment, timeout, and
//! parallel early-exit evaluation.

use crate::attributes::resolver::AttributeResolver;
use crate::policy::interp;
use crate::policy::types::{CompiledPolicy, Decision, EvaluationContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EvaluatorConfig {
    /// Deadline for a single `evaluate` call.
    pub evaluation_timeout: Duration,
    /// Policy counts at or below this are evaluated sequentially.
    pub parallel_threshold: usize,
    /// Maximum concurrent workers when fanning out.
    pub parallel_evaluations: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout: Duration::from_millis(10),
            parallel_threshold: 4,
            parallel_evaluations: 8,
        }
    }
}

pub struct PolicyEvaluator {
    config: EvaluatorConfig,
    resolver: Arc<AttributeResolver>,
}

impl PolicyEvaluator {
    pub fn new(config: EvaluatorConfig, resolver: Arc<AttributeResolver>) -> Self {
        Self { config, resolver }
    }

    /// Evaluate `policies` (assumed already compiled) against `ctx`.
    ///
    /// Policies are sorted by priority, descending, before evaluation. In
    /// sequential mode the returned `matched_policies` entry is therefore
    /// the highest-priority matching policy; in parallel mode only "an
    /// allowing policy exists" is guaranteed, not which one.
    #[tracing::instrument(skip(self, policies, ctx))]
    pub async fn evaluate(
        &self,
        policies: &[CompiledPolicy],
        mut ctx: EvaluationContext,
    ) -> Decision {
        let start = Instant::now();

        if let Err(err) = self.resolver.enrich_evaluation_context(&mut ctx).await {
            warn!(error = %err, "attribute enrichment failed, evaluating with partial context");
        }

        if policies.is_empty() {
            return Decision::deny(0, start.elapsed());
        }

        let mut ordered: Vec<&CompiledPolicy> = policies.iter().collect();
        sort_by_priority(&mut ordered);

        let deadline = start + self.config.evaluation_timeout;

        if ordered.len() <= self.config.parallel_threshold {
            self.evaluate_sequential(&ordered, &ctx, start, deadline)
        } else {
            self.evaluate_parallel(&ordered, &ctx, start, deadline).await
        }
    }

    /// `EvaluateBatch`: a straight loop, no cross-request sharing.
    pub async fn evaluate_batch(
        &self,
        requests: &[(Vec<CompiledPolicy>, EvaluationContext)],
    ) -> Vec<Decision> {
        let mut decisions = Vec::with_capacity(requests.len());
        for (policies, ctx) in requests {
            decisions.push(self.evaluate(policies, ctx.clone()).await);
        }
        decisions
    }

    fn evaluate_sequential(
        &self,
        ordered: &[&CompiledPolicy],
        ctx: &EvaluationContext,
        start: Instant,
        deadline: Instant,
    ) -> Decision {
        let mut evaluated = 0usize;
        let mut errored = 0usize;

        for policy in ordered {
            if Instant::now() >= deadline {
                return Decision::timeout(evaluated, start.elapsed());
            }

            evaluated += 1;
            match interp::eval(&policy.program, ctx) {
                Ok(true) => return Decision::allow(policy.id, evaluated, start.elapsed()),
                Ok(false) => {}
                Err(err) => {
                    errored += 1;
                    warn!(policy_id = %policy.id, error = %err, "policy evaluation error, skipping");
                }
            }
        }

        let mut decision = Decision::deny(evaluated, start.elapsed());
        if errored == evaluated && evaluated > 0 {
            decision.error = Some("every policy errored during evaluation".to_string());
        }
        decision
    }

    async fn evaluate_parallel(
        &self,
        ordered: &[&CompiledPolicy],
        ctx: &EvaluationContext,
        start: Instant,
        deadline: Instant,
    ) -> Decision {
        let cancelled = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let evaluated_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let error_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let chunk_size = ordered.len().div_ceil(self.config.parallel_evaluations).max(1);
        let mut workers = Vec::new();

        for chunk in ordered.chunks(chunk_size) {
            let chunk: Vec<CompiledPolicy> = chunk.iter().map(|p| (*p).clone()).collect();
            let ctx = ctx.clone();
            let cancelled = Arc::clone(&cancelled);
            let notify = Arc::clone(&notify);
            let evaluated_count = Arc::clone(&evaluated_count);
            let error_count = Arc::clone(&error_count);

            workers.push(tokio::spawn(async move {
                for policy in &chunk {
                    if cancelled.load(Ordering::Acquire) || Instant::now() >= deadline {
                        return None;
                    }

                    evaluated_count.fetch_add(1, Ordering::Relaxed);
                    match interp::eval(&policy.program, &ctx) {
                        Ok(true) => {
                            cancelled.store(true, Ordering::Release);
                            notify.notify_waiters();
                            return Some(policy.id);
                        }
                        Ok(false) => {}
                        Err(err) => {
                            error_count.fetch_add(1, Ordering::Relaxed);
                            warn!(policy_id = %policy.id, error = %err, "policy evaluation error, skipping");
                        }
                    }
                }
                None
            }));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let joined = tokio::time::timeout(remaining, futures::future::join_all(workers)).await;

        let results = match joined {
            Ok(results) => results,
            Err(_) => {
                cancelled.store(true, Ordering::Release);
                let evaluated = evaluated_count.load(Ordering::Relaxed);
                return Decision::timeout(evaluated, start.elapsed());
            }
        };

        let winner = results.into_iter().find_map(|r| r.ok().flatten());
        let evaluated = evaluated_count.load(Ordering::Relaxed);

        match winner {
            Some(policy_id) => Decision::allow(policy_id, evaluated, start.elapsed()),
            None => {
                let mut decision = Decision::deny(evaluated, start.elapsed());
                let errored = error_count.load(Ordering::Relaxed);
                if errored == evaluated && evaluated > 0 {
                    decision.error = Some("every policy errored during evaluation".to_string());
                }
                decision
            }
        }
    }
}

/// Stable descending sort by priority, falling back to id for ties.
/// Insertion sort below 16 elements avoids the sort-by allocator overhead on
/// the common small-batch path; `sort_by` is used above it.
fn sort_by_priority(policies: &mut [&CompiledPolicy]) {
    const INSERTION_SORT_THRESHOLD: usize = 16;

    if policies.len() <= INSERTION_SORT_THRESHOLD {
        for i in 1..policies.len() {
            let mut j = i;
            while j > 0 && is_lower_priority(policies[j - 1], policies[j]) {
                policies.swap(j - 1, j);
                j -= 1;
            }
        }
    } else {
        policies.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    }
}

fn is_lower_priority(a: &CompiledPolicy, b: &CompiledPolicy) -> bool {
    (a.priority, std::cmp::Reverse(a.id)) < (b.priority, std::cmp::Reverse(b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::cache::AttributeCache;
    use crate::attributes::resolver::{AttributeResolverConfig, InMemoryAttributeCache};
    use crate::policy::compiler::{CompilerConfig, PolicyCompiler};
    use crate::policy::types::Policy;
    use crate::tenant::TenantScope;
    use std::time::Duration;
    use uuid::Uuid;

    fn policy(expression: &str, priority: i64) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            scope: TenantScope::app("app1"),
            namespace_id: "default".into(),
            name: "test".into(),
            description: String::new(),
            expression: expression.to_string(),
            resource_type: "document".into(),
            allowed_actions: vec!["read".into()],
            priority,
            version: 1,
            enabled: true,
        }
    }

    fn resolver() -> Arc<AttributeResolver> {
        let cache: Arc<dyn AttributeCache> = Arc::new(InMemoryAttributeCache::new(Duration::from_secs(300)));
        Arc::new(AttributeResolver::new(AttributeResolverConfig::default(), cache))
    }

    #[tokio::test]
    async fn empty_policy_set_denies_with_zero_evaluated() {
        let evaluator = PolicyEvaluator::new(EvaluatorConfig::default(), resolver());
        let decision = evaluator.evaluate(&[], EvaluationContext::new("read")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.evaluated_policies, 0);
    }

    #[tokio::test]
    async fn sequential_mode_picks_highest_priority_match() {
        let compiler = PolicyCompiler::new(CompilerConfig::default());
        let hi = policy("has_role(\"admin\")", 200);
        let lo = policy("resource.owner == principal.id", 100);
        let compiled_hi = compiler.compile(&hi).unwrap();
        let compiled_lo = compiler.compile(&lo).unwrap();

        let evaluator = PolicyEvaluator::new(EvaluatorConfig::default(), resolver());
        let ctx = EvaluationContext::new("read")
            .with_principal("id", "u2")
            .with_principal("roles", crate::policy::value::Value::List(vec!["admin".into()]))
            .with_resource("owner", "u1");

        let decision = evaluator.evaluate(&[compiled_lo, compiled_hi], ctx).await;
        assert!(decision.allowed);
        assert_eq!(decision.matched_policies, vec![hi.id]);
    }

    #[tokio::test]
    async fn already_expired_deadline_yields_timeout() {
        let mut config = EvaluatorConfig::default();
        config.evaluation_timeout = Duration::from_nanos(0);
        let compiler = PolicyCompiler::new(CompilerConfig::default());
        let policies: Vec<_> = (0..1000)
            .map(|i| compiler.compile(&policy("false", i)).unwrap())
            .collect();

        let evaluator = PolicyEvaluator::new(config, resolver());
        let decision = evaluator.evaluate(&policies, EvaluationContext::new("read")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.error.as_deref(), Some("evaluation timeout"));
    }

    #[tokio::test]
    async fn parallel_mode_finds_an_allowing_policy() {
        let compiler = PolicyCompiler::new(CompilerConfig::default());
        let mut policies = Vec::new();
        for i in 0..10 {
            let expr = if i == 7 { "true" } else { "false" };
            policies.push(compiler.compile(&policy(expr, i)).unwrap());
        }

        let evaluator = PolicyEvaluator::new(EvaluatorConfig::default(), resolver());
        let decision = evaluator.evaluate(&policies, EvaluationContext::new("read")).await;
        assert!(decision.allowed);
    }
}
