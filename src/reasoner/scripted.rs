use super::{Draft, Reasoner, ReasonerError, ReasonerOutput, ReasoningContext, ReasoningPurpose};
use crate::calendar::format::format_duration;
use crate::calendar::model::{CalendarSnapshot, Candidate, Request};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
pub struct ScriptedReasoner {
    proposal: Result<Candidate, ReasonerError>,
    draft: Option<Draft>,
    draft_error: Option<ReasonerError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn proposing(candidate: Candidate) -> Self {
        Self {
            proposal: Ok(candidate),
            draft: None,
            draft_error: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ReasonerError) -> Self {
        Self {
            proposal: Err(error),
            ..Self::proposing_nothing()
        }
    }

    fn proposing_nothing() -> Self {
        Self {
            proposal: Err(ReasonerError::Empty(ReasoningPurpose::ProposeSlot)),
            draft: None,
            draft_error: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_draft(mut self, subject: impl Into<String>, body: impl Into<String>) -> Self {
        self.draft = Some(Draft {
            subject: subject.into(),
            body: body.into(),
        });
        self
    }

    pub fn with_draft_error(mut self, error: ReasonerError) -> Self {
        self.draft_error = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reasoner for ScriptedReasoner {
    fn reason(
        &self,
        request: &Request,
        _snapshot: &CalendarSnapshot,
        context: &ReasoningContext,
    ) -> Result<ReasonerOutput, ReasonerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        match context.purpose {
            ReasoningPurpose::ProposeSlot => self.proposal.clone().map(ReasonerOutput::Candidate),
            ReasoningPurpose::DraftMessage => {
                if let Some(err) = &self.draft_error {
                    return Err(err.clone());
                }
                if let Some(draft) = &self.draft {
                    return Ok(ReasonerOutput::Draft(draft.clone()));
                }
                template_draft(request, context).map(ReasonerOutput::Draft)
            }
        }
    }
}

fn template_draft(request: &Request, context: &ReasoningContext) -> Result<Draft, ReasonerError> {
    let candidate = context
        .candidate
        .as_ref()
        .ok_or(ReasonerError::Empty(ReasoningPurpose::DraftMessage))?;
    let title = if candidate.title.trim().is_empty() {
        "Meeting"
    } else {
        candidate.title.trim()
    };
    let details = context.candidate_details.clone().unwrap_or_default();
    let rescheduled = if context.conflicts.is_empty() {
        String::new()
    } else {
        "\nThis time was chosen to avoid an existing conflict.\n".to_string()
    };
    Ok(Draft {
        subject: format!("{title} ({})", format_duration(candidate.duration())),
        body: format!(
            "Hi,\n\nI'd like to set up the following meeting:\n\n{details}\n{rescheduled}\nOriginal request: {}\n\nPlease let me know if this time works.\n",
            request.text.trim()
        ),
    })
}
