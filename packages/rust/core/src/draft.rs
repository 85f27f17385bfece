//! Draft session: full-draft generation and per-section regeneration.
//!
//! A [`DraftSession`] owns the document being drafted. Full drafts replace
//! the section list wholesale once the stream completes; regeneration streams
//! into one section live and restores its previous content if the stream
//! fails or is cancelled.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use specter_generation::{ChatRequest, GenerationClient};
use specter_shared::{DraftDocument, DraftSection, Fact, HeadingSpec, Result, SpecterError, complaint_headings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::aggregator::{self, StreamObserver};
use crate::prompt::{self, RelatedCase};
use crate::splitter;

/// Drafting state for one document.
pub struct DraftSession {
    document: Arc<RwLock<DraftDocument>>,
    client: Arc<dyn GenerationClient>,
    model: String,
    temperature: Option<f32>,
    headings: Vec<HeadingSpec>,
    regenerating: Arc<Mutex<HashSet<String>>>,
}

impl DraftSession {
    /// A session over an empty document using the canonical complaint headings.
    pub fn new(client: Arc<dyn GenerationClient>, model: impl Into<String>) -> Self {
        Self {
            document: Arc::new(RwLock::new(DraftDocument::default())),
            client,
            model: model.into(),
            temperature: None,
            headings: complaint_headings(),
            regenerating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start from an existing document (for example one loaded from disk).
    pub fn with_document(self, document: DraftDocument) -> Self {
        *self.document.write().unwrap_or_else(PoisonError::into_inner) = document;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// A copy of the current document.
    pub fn document(&self) -> DraftDocument {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a regeneration of `section_id` is currently running.
    pub fn is_regenerating(&self, section_id: &str) -> bool {
        self.regenerating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(section_id)
    }

    // -----------------------------------------------------------------------
    // Full draft
    // -----------------------------------------------------------------------

    /// Generate a full draft and replace the document's sections with it.
    ///
    /// On failure or cancellation the document is left untouched.
    #[instrument(skip_all, fields(model = %self.model, facts = facts.len(), cases = cases.len()))]
    pub async fn generate_full(
        &self,
        facts: &[Fact],
        cases: &[RelatedCase],
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<DraftSection>> {
        let messages = prompt::full_draft_messages(facts, cases, &self.headings);
        let request = self.request(messages);

        let stream = self.client.stream(request).await?;
        let mut session = aggregator::consume(stream, observer, cancel).await?;

        if session.text().trim().is_empty() {
            warn!("generation produced no text");
            return Err(SpecterError::generation("generation returned an empty draft"));
        }

        let sections = session.split(&self.headings)?;
        *self.document.write().unwrap_or_else(PoisonError::into_inner) =
            DraftDocument::new(sections.clone());

        info!(
            sections = sections.len(),
            chars = session.text().len(),
            "full draft generated"
        );
        Ok(sections)
    }

    // -----------------------------------------------------------------------
    // Section regeneration
    // -----------------------------------------------------------------------

    /// Regenerate one editable section, streaming its content live.
    ///
    /// Returns [`SpecterError::Busy`] if the same section is already being
    /// regenerated. On failure or cancellation the previous content is restored.
    #[instrument(skip_all, fields(model = %self.model, section_id = %section_id))]
    pub async fn regenerate_section(
        &self,
        section_id: &str,
        facts: &[Fact],
        cases: &[RelatedCase],
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<DraftSection> {
        let target = self.regeneration_target(section_id)?;
        let previous = target.previous;
        let _guard = self.claim(section_id)?;

        let messages = prompt::section_messages(&target.title, facts, cases);
        let stream = self.client.stream(self.request(messages)).await?;

        let mut live = LiveSection {
            document: &self.document,
            section_id,
            heading: target.heading.as_ref(),
            inner: observer,
        };
        let mut session = match aggregator::consume(stream, &mut live, cancel).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "regeneration failed, restoring previous content");
                self.write_content(section_id, previous);
                return Err(e);
            }
        };

        if session.text().trim().is_empty() {
            warn!("regeneration produced no text, restoring previous content");
            self.write_content(section_id, previous);
            return Err(SpecterError::generation("generation returned an empty section"));
        }

        // Sections without a canonical heading take the whole reply.
        let content = match &target.heading {
            Some(heading) => session
                .split(std::slice::from_ref(heading))?
                .into_iter()
                .next()
                .map(|s| s.content.trim().to_string())
                .unwrap_or_default(),
            None => session.text().trim().to_string(),
        };
        self.write_content(section_id, content.clone());
        debug!(chars = content.len(), "section regenerated");

        Ok(DraftSection {
            id: section_id.to_string(),
            title: target.title,
            content,
            editable: true,
        })
    }

    /// Manually replace the content of an editable section.
    pub fn update_section(&self, section_id: &str, content: impl Into<String>) -> Result<()> {
        let mut document = self.document.write().unwrap_or_else(PoisonError::into_inner);
        let section = document
            .section_mut(section_id)
            .ok_or_else(|| SpecterError::validation(format!("unknown section {section_id}")))?;
        if !section.editable {
            return Err(SpecterError::validation(format!(
                "section {section_id} is not editable"
            )));
        }
        section.content = content.into();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn request(&self, messages: Vec<specter_generation::ChatMessage>) -> ChatRequest {
        ChatRequest::new(self.model.clone(), messages).with_temperature(self.temperature)
    }

    fn regeneration_target(&self, section_id: &str) -> Result<RegenerationTarget> {
        let document = self.document.read().unwrap_or_else(PoisonError::into_inner);
        let section = document
            .section(section_id)
            .ok_or_else(|| SpecterError::validation(format!("unknown section {section_id}")))?;
        if !section.editable {
            return Err(SpecterError::validation(format!(
                "section {section_id} is not editable"
            )));
        }

        let heading = self
            .headings
            .iter()
            .find(|h| h.section_id == section_id)
            .cloned();
        Ok(RegenerationTarget {
            title: heading
                .as_ref()
                .map_or_else(|| section.title.clone(), |h| h.label.clone()),
            heading,
            previous: section.content.clone(),
        })
    }

    fn claim(&self, section_id: &str) -> Result<RegenerationGuard> {
        let mut active = self.regenerating.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(section_id.to_string()) {
            return Err(SpecterError::Busy {
                section_id: section_id.to_string(),
            });
        }
        Ok(RegenerationGuard {
            active: self.regenerating.clone(),
            section_id: section_id.to_string(),
        })
    }

    fn write_content(&self, section_id: &str, content: String) {
        write_section(&self.document, section_id, content);
    }
}

fn write_section(document: &RwLock<DraftDocument>, section_id: &str, content: String) {
    let mut document = document.write().unwrap_or_else(PoisonError::into_inner);
    match document.section_mut(section_id) {
        Some(section) => section.content = content,
        None => warn!(%section_id, "section disappeared during regeneration"),
    }
}

/// What a regeneration writes under and restores on failure.
struct RegenerationTarget {
    /// Title used in the prompt and on the returned section.
    title: String,
    /// Canonical heading, if the section has one. Replies are split on it.
    heading: Option<HeadingSpec>,
    previous: String,
}

/// Releases a section's regeneration slot on drop.
struct RegenerationGuard {
    active: Arc<Mutex<HashSet<String>>>,
    section_id: String,
}

impl Drop for RegenerationGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.section_id);
    }
}

/// Writes the streamed content into one section, then forwards the snapshot.
struct LiveSection<'a> {
    document: &'a RwLock<DraftDocument>,
    section_id: &'a str,
    heading: Option<&'a HeadingSpec>,
    inner: &'a mut dyn StreamObserver,
}

impl StreamObserver for LiveSection<'_> {
    fn on_snapshot(&mut self, text: &str) {
        let content = match self.heading {
            Some(heading) => splitter::single_section_content(text, heading),
            None => text.trim().to_string(),
        };
        write_section(self.document, self.section_id, content);
        self.inner.on_snapshot(text);
    }

    fn on_complete(&mut self, text: &str) {
        self.inner.on_complete(text);
    }
}
