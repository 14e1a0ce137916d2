use crate::error::{Error, EvaluationError};
use crate::options::DiffOptions;
use crate::render::RenderTree;
use crate::template::Template;
use crate::value::Value;
use crate::{diff, encode};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use stencil_protocol::Fragment;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(Ulid);

impl PageId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct PageState {
    tree: RenderTree,
    data: Value,
    version: u64,
}

/// One connected view: the last tree and data the client is known to hold.
///
/// Full renders take the lock shared; updates take it exclusively, so the
/// updates of one page never interleave.
#[derive(Debug)]
pub struct Page {
    id: PageId,
    template: Arc<Template>,
    options: DiffOptions,
    state: RwLock<PageState>,
}

/// An update computed against a known version of the page. Committing it
/// fails if another update landed first; dropping it cancels it.
#[derive(Debug, Clone)]
#[must_use = "a pending update does nothing until committed"]
pub struct PendingUpdate {
    base_version: u64,
    tree: RenderTree,
    data: Value,
    fragments: Vec<Fragment>,
}

impl PendingUpdate {
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn base_version(&self) -> u64 {
        self.base_version
    }
}

impl Page {
    pub fn new(template: Arc<Template>, data: Value, options: DiffOptions) -> Result<Self, EvaluationError> {
        let tree = template.render(&data)?;
        let id = PageId::new();
        debug!("page {id} created");
        Ok(Self {
            id,
            template,
            options,
            state: RwLock::new(PageState {
                tree,
                data,
                version: 0,
            }),
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    /// The committed tree, as sent on (re)connect.
    pub fn render(&self) -> RenderTree {
        self.read().tree.clone()
    }

    pub fn data(&self) -> Value {
        self.read().data.clone()
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Renders `data`, diffs it against the committed tree and commits it.
    /// A failing render leaves the page as it was.
    pub fn update(&self, data: Value) -> Result<Vec<Fragment>, EvaluationError> {
        let mut state = self.write();
        let tree = self.template.render(&data)?;
        let fragments = encode::fragments(diff::compare(&state.tree, &tree, &self.options));
        state.tree = tree;
        state.data = data;
        state.version += 1;
        debug!(
            "page {} committed version {} with {} fragments",
            self.id,
            state.version,
            fragments.len()
        );
        Ok(fragments)
    }

    /// Computes an update without committing it.
    pub fn prepare(&self, data: Value) -> Result<PendingUpdate, EvaluationError> {
        let (base_version, previous) = {
            let state = self.read();
            (state.version, state.tree.clone())
        };
        let tree = self.template.render(&data)?;
        let fragments = encode::fragments(diff::compare(&previous, &tree, &self.options));
        Ok(PendingUpdate {
            base_version,
            tree,
            data,
            fragments,
        })
    }

    /// Commits `pending` if the page is still at the version it was prepared
    /// against, returning its fragments.
    pub fn commit(&self, pending: PendingUpdate) -> Result<Vec<Fragment>, Error> {
        let mut state = self.write();
        if state.version != pending.base_version {
            return Err(Error::StaleUpdate {
                expected: pending.base_version,
                found: state.version,
            });
        }
        state.tree = pending.tree;
        state.data = pending.data;
        state.version += 1;
        debug!("page {} committed version {}", self.id, state.version);
        Ok(pending.fragments)
    }

    // A panic while holding the lock cannot leave the state half written:
    // every field is assigned only after rendering succeeded.
    fn read(&self) -> RwLockReadGuard<'_, PageState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PageState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

type InitialState = Box<dyn Fn() -> Value + Send + Sync>;

/// A compiled template plus the factory producing each new page's data.
pub struct Application {
    template: Arc<Template>,
    initial_state: InitialState,
    options: DiffOptions,
}

impl Application {
    pub fn new(template: Template, initial_state: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            template: Arc::new(template),
            initial_state: Box::new(initial_state),
            options: DiffOptions::default(),
        }
    }

    pub fn with_diff_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    pub fn new_page(&self) -> Result<Page, EvaluationError> {
        Page::new(Arc::clone(&self.template), (self.initial_state)(), self.options.clone())
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("template", &self.template)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter() -> Application {
        Application::new(
            Template::compile("<div>Counter: {{.Counter}}</div>").unwrap(),
            || Value::from(json!({"Counter": 0})),
        )
    }

    #[test]
    fn pages_start_from_the_factory_state() {
        let application = counter();
        let first = application.new_page().unwrap();
        let second = application.new_page().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.render().render(), "<div>Counter: 0</div>");
        assert_eq!(first.version(), 0);
    }

    #[test]
    fn failed_renders_keep_the_committed_state() {
        let page = counter().new_page().unwrap();
        assert!(page.update(Value::from(json!({"Other": 1}))).is_err());
        assert_eq!(page.version(), 0);
        assert_eq!(page.data(), Value::from(json!({"Counter": 0})));
    }

    #[test]
    fn stale_updates_are_rejected() {
        let page = counter().new_page().unwrap();
        let pending = page.prepare(Value::from(json!({"Counter": 1}))).unwrap();
        assert_eq!(pending.fragments().len(), 1);
        page.update(Value::from(json!({"Counter": 2}))).unwrap();
        assert!(matches!(
            page.commit(pending),
            Err(Error::StaleUpdate { expected: 0, found: 1 })
        ));
        assert_eq!(page.render().render(), "<div>Counter: 2</div>");

        let pending = page.prepare(Value::from(json!({"Counter": 3}))).unwrap();
        assert_eq!(page.commit(pending).unwrap().len(), 1);
        assert_eq!(page.version(), 2);
    }
}
