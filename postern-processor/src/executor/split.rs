use std::{sync::Arc, time::Instant};

use postern_common::{AddressList, AttributeName, Mail, processing};

use super::{StepContext, record_failure};
use crate::{
    error::{MatcherError, ProcessingError},
    listener::MatcherEvent,
    step::{OnMatchError, PipelineStep},
};

/// Keeps only actual recipients of `mail`, once each.
fn restrict(mail: &Mail, matched: AddressList) -> AddressList {
    let mut kept = AddressList::new();
    for address in matched {
        if !mail.recipients().contains(&address) {
            processing!(
                level = DEBUG,
                mail = %mail.name(),
                "Ignoring matched address {address}, which is not a recipient"
            );
        } else if !kept.contains(&address) {
            kept.push(address);
        }
    }
    kept
}

/// Runs the step's matcher and splits `mail` accordingly.
///
/// Returns the mail, and, when only some recipients matched, a clone holding
/// those recipients. Whichever mail holds the matched recipients is flagged
/// as matched; the two never share a recipient.
pub(crate) async fn split(
    ctx: &StepContext<'_>,
    step: &PipelineStep,
    mut mail: Mail,
) -> Result<Vec<Mail>, ProcessingError> {
    let matcher = step.matcher().name();
    let recipients = mail.recipients().clone();

    let started = Instant::now();
    let outcome = step.matcher().matched(&mail).await;
    let duration = started.elapsed();

    let (matched, error): (AddressList, Option<Arc<MatcherError>>) = match outcome {
        Ok(matched) => (restrict(&mail, matched), None),
        Err(error) => {
            let policy = step.match_error_policy();
            if *policy == OnMatchError::Propagate {
                notify(ctx, matcher, &mail, &recipients, None, duration, Some(&error));

                return Err(ProcessingError::Matcher {
                    processor: ctx.state.clone(),
                    matcher: matcher.to_owned(),
                    mail: mail.name().to_owned(),
                    source: error,
                });
            }

            tracing::warn!(
                mail = %mail.name(),
                processor = %ctx.state,
                matcher,
                error = %error,
                policy = %policy,
                "Matcher failed"
            );

            let error = Arc::new(error);
            record_failure(&mut mail, AttributeName::MATCHER_ERROR, matcher, &error);

            let matched = match policy {
                OnMatchError::MatchAll => recipients.clone(),
                OnMatchError::Reroute(state) => {
                    mail.set_state(state.clone());
                    AddressList::new()
                }
                OnMatchError::NoMatch | OnMatchError::Propagate => AddressList::new(),
            };

            (matched, Some(error))
        }
    };

    notify(
        ctx,
        matcher,
        &mail,
        &recipients,
        Some(&matched),
        duration,
        error.as_deref(),
    );

    if matched.is_empty() {
        return Ok(vec![mail]);
    }

    if matched.same_members(mail.recipients()) {
        mail.mark_matched();
        return Ok(vec![mail]);
    }

    let mut clone = mail.split_off(&matched);
    clone.mark_matched();

    processing!(
        level = DEBUG,
        mail = %mail.name(),
        clone = %clone.name(),
        processor = %ctx.state,
        "Split {} of {} recipients off for {matcher}",
        clone.recipients().len(),
        recipients.len()
    );

    Ok(vec![mail, clone])
}

fn notify(
    ctx: &StepContext<'_>,
    matcher: &str,
    mail: &Mail,
    recipients: &AddressList,
    matched: Option<&AddressList>,
    duration: std::time::Duration,
    error: Option<&MatcherError>,
) {
    let event = MatcherEvent {
        processor: ctx.state,
        matcher,
        mail: mail.name(),
        recipients,
        matched,
        duration,
        error,
    };

    for listener in ctx.listeners {
        listener.after_matcher(&event);
    }
}
