use async_trait::async_trait;
use core_logic::{
    Account, AccountProcessor, AttemptOutcome, ProxyRotator, SessionAuthenticator,
    SessionFactory, TaskSequencer, WorkerContext,
};
use std::sync::Arc;
use tracing::{info, warn};

/// One full pass over an account: fresh session on the next proxy,
/// authentication, then every configured task in order.
pub struct FantasyProcessor<F: SessionFactory> {
    factory: F,
    rotator: Arc<ProxyRotator>,
    authenticator: Arc<SessionAuthenticator>,
    sequencer: TaskSequencer<F::Session>,
}

impl<F: SessionFactory> FantasyProcessor<F> {
    pub fn new(
        factory: F,
        rotator: Arc<ProxyRotator>,
        authenticator: Arc<SessionAuthenticator>,
        sequencer: TaskSequencer<F::Session>,
    ) -> Self {
        Self {
            factory,
            rotator,
            authenticator,
            sequencer,
        }
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.sequencer.task_names()
    }
}

#[async_trait]
impl<F> AccountProcessor for FantasyProcessor<F>
where
    F: SessionFactory + 'static,
    F::Session: 'static,
{
    async fn process(&self, account: &Account, ctx: &WorkerContext) -> AttemptOutcome {
        let proxy = self.rotator.next();
        let mut session = match self.factory.create(ctx, proxy) {
            Ok(s) => s,
            Err(e) => {
                warn!("{} | Could not build session: {}", account, e);
                return AttemptOutcome::Failure(format!("session: {}", e));
            }
        };

        let token = match self
            .authenticator
            .authenticate(&mut session, account, ctx.is_first_attempt(), &ctx.cancel)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!(target: "task_result", "{} | Authorization FAILED: {}", account, e);
                return AttemptOutcome::Failure(e.to_string());
            }
        };

        let report = self
            .sequencer
            .run(&mut session, account, token, &ctx.cancel)
            .await;

        if report.success() {
            info!(
                target: "task_result",
                "{} | All {} tasks SUCCESS",
                account,
                report.tasks.len()
            );
            return AttemptOutcome::Success;
        }
        if report.cancelled {
            return AttemptOutcome::Failure("cancelled".to_string());
        }

        let failed = report.failed_tasks().join(", ");
        warn!(target: "task_result", "{} | FAILED tasks: {}", account, failed);
        AttemptOutcome::Failure(failed)
    }
}
