use std::{sync::Arc, time::Instant};

use postern_common::{AttributeName, Mail, State, processing};

use super::{StepContext, record_failure};
use crate::{
    error::{MailetError, ProcessingError},
    listener::MailetEvent,
    step::{OnMailetError, PipelineStep},
};

/// Runs the step's mailet on a matched mail, applying the step's error policy.
///
/// A mail left without recipients is ghosted, whatever the mailet did to its
/// state. The mailet is abandoned if the context's interrupt fires first, which
/// counts as a mailet failure.
pub(crate) async fn service(
    ctx: &StepContext<'_>,
    step: &PipelineStep,
    mail: &mut Mail,
) -> Result<(), ProcessingError> {
    let mailet = step.mailet().name();
    let mut interrupt = ctx.interrupt.clone();

    processing!(
        mail = %mail.name(),
        processor = %ctx.state,
        "Servicing mail with {mailet}"
    );

    let started = Instant::now();
    let outcome = tokio::select! {
        biased;

        outcome = step.mailet().service(mail) => outcome,
        () = interrupt.interrupted() => Err(MailetError::Interrupted),
    };
    let duration = started.elapsed();

    let error = match outcome {
        Ok(()) => None,
        Err(error) => {
            let policy = step.mailet_error_policy();
            if *policy == OnMailetError::Propagate {
                notify(ctx, mailet, mail, duration, Some(&error));

                return Err(ProcessingError::Mailet {
                    processor: ctx.state.clone(),
                    mailet: mailet.to_owned(),
                    mail: mail.name().to_owned(),
                    source: error,
                });
            }

            tracing::warn!(
                mail = %mail.name(),
                processor = %ctx.state,
                mailet,
                error = %error,
                policy = %policy,
                "Mailet failed"
            );

            let error = Arc::new(error);
            record_failure(mail, AttributeName::MAILET_ERROR, mailet, &error);

            match policy {
                OnMailetError::Reroute(state) => mail.set_state(state.clone()),
                OnMailetError::Ignore | OnMailetError::Propagate => {
                    // The mailet may have stopped halfway through editing the
                    // recipients.
                    if let Err(source) = mail.verify_recipients() {
                        notify(ctx, mailet, mail, duration, Some(&*error));

                        return Err(ProcessingError::InvalidRecipients {
                            mail: mail.name().to_owned(),
                            source,
                        });
                    }
                }
            }

            Some(error)
        }
    };

    if mail.recipients().is_empty() && !mail.is_ghost() {
        processing!(
            level = DEBUG,
            mail = %mail.name(),
            processor = %ctx.state,
            "No recipients left after {mailet}, ending processing"
        );
        mail.set_state(State::GHOST);
    }

    notify(ctx, mailet, mail, duration, error.as_deref());

    Ok(())
}

fn notify(
    ctx: &StepContext<'_>,
    mailet: &str,
    mail: &Mail,
    duration: std::time::Duration,
    error: Option<&MailetError>,
) {
    let event = MailetEvent {
        processor: ctx.state,
        mailet,
        mail: mail.name(),
        state: mail.state(),
        duration,
        error,
    };

    for listener in ctx.listeners {
        listener.after_mailet(&event);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        builtin::{All, Null, ToProcessor},
        interrupt::Interrupt,
        testing::{ClearRecipients, FailingMailet, SlowMailet},
    };

    fn mail() -> Mail {
        Mail::builder()
            .name("m")
            .recipients("a@x.org, b@x.org".parse().unwrap())
            .build()
    }

    async fn run(step: &PipelineStep, mail: &mut Mail) -> Result<(), ProcessingError> {
        run_with(step, mail, &Interrupt::never()).await
    }

    async fn run_with(
        step: &PipelineStep,
        mail: &mut Mail,
        interrupt: &Interrupt,
    ) -> Result<(), ProcessingError> {
        let ctx = StepContext {
            state: &State::ROOT,
            listeners: &[],
            interrupt,
        };
        service(&ctx, step, mail).await
    }

    #[tokio::test]
    async fn mailet_changes_state() {
        let step = PipelineStep::new(Arc::new(All), Arc::new(ToProcessor::new(State::TRANSPORT)));
        let mut mail = mail();

        run(&step, &mut mail).await.unwrap();
        assert_eq!(mail.state(), &State::TRANSPORT);

        run(&PipelineStep::new(Arc::new(All), Arc::new(Null)), &mut mail)
            .await
            .unwrap();
        assert!(mail.is_ghost());
    }

    #[tokio::test]
    async fn empty_recipients_ghost_the_mail() {
        let step = PipelineStep::new(Arc::new(All), Arc::new(ClearRecipients));
        let mut mail = mail();

        run(&step, &mut mail).await.unwrap();

        assert!(mail.is_ghost());
    }

    #[tokio::test]
    async fn failure_reroutes_to_error_by_default() {
        let step = PipelineStep::new(Arc::new(All), Arc::new(FailingMailet::default()));
        let mut mail = mail();

        run(&step, &mut mail).await.unwrap();

        assert_eq!(mail.state(), &State::ERROR);
        assert_eq!(
            mail.error_message(),
            Some("Exception calling FailingMailet: mailet failure")
        );
        assert!(mail.diagnostic().is_some());
        assert!(mail.attribute(&AttributeName::MAILET_ERROR).is_some());
    }

    #[tokio::test]
    async fn ignored_failure_keeps_state_and_checks_recipients() {
        let step = PipelineStep::new(Arc::new(All), Arc::new(FailingMailet::default()))
            .on_mailet_error(OnMailetError::Ignore);

        let mut mail = mail();
        run(&step, &mut mail).await.unwrap();
        assert_eq!(mail.state(), &State::ROOT);
        assert!(mail.diagnostic().is_some());

        let mut broken = self::mail();
        broken.recipients_mut().push("a@x.org".parse().unwrap());
        assert!(matches!(
            run(&step, &mut broken).await,
            Err(ProcessingError::InvalidRecipients { .. })
        ));
    }

    #[tokio::test]
    async fn propagated_failure_aborts() {
        let step = PipelineStep::new(Arc::new(All), Arc::new(FailingMailet::default()))
            .on_mailet_error(OnMailetError::Propagate);
        let mut mail = mail();

        let result = run(&step, &mut mail).await;

        assert!(matches!(
            result,
            Err(ProcessingError::Mailet {
                source: MailetError::Failed(_),
                ..
            })
        ));
        assert_eq!(mail.state(), &State::ROOT);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_is_handled_by_the_policy() {
        let (handle, interrupt) = Interrupt::channel();
        let slow = || Arc::new(SlowMailet::new(Duration::from_secs(3600)));
        let rerouting = PipelineStep::new(Arc::new(All), slow());
        let propagating =
            PipelineStep::new(Arc::new(All), slow()).on_mailet_error(OnMailetError::Propagate);

        let task = tokio::spawn(async move {
            let mut rerouted = mail();
            let result = run_with(&rerouting, &mut rerouted, &interrupt).await;
            let mut propagated = mail();
            let propagated = run_with(&propagating, &mut propagated, &interrupt).await;
            (result, rerouted, propagated)
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.interrupt();

        let (result, rerouted, propagated) = task.await.unwrap();
        result.unwrap();
        assert_eq!(rerouted.state(), &State::ERROR);
        assert!(
            rerouted
                .error_message()
                .is_some_and(|message| message.contains("Interrupted"))
        );
        assert!(matches!(
            propagated,
            Err(ProcessingError::Mailet {
                source: MailetError::Interrupted,
                ..
            })
        ));
    }
}
