//! Test harness driving a template through renders and diffs while a
//! reference client follows along from the wire output.

#![allow(dead_code)]

use serde_json::Value as Json;
use stencil::{ClientView, DiffOptions, Fragment, RenderTree, Template, Value};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn data(json: Json) -> Value {
    Value::from(json)
}

/// A template, its last render and a client holding that render.
pub struct TestClient {
    template: Template,
    options: DiffOptions,
    tree: RenderTree,
    client: ClientView,
}

impl TestClient {
    pub fn new(source: &str, initial: Json) -> Self {
        Self::with_options(source, initial, DiffOptions::default())
    }

    pub fn with_options(source: &str, initial: Json, options: DiffOptions) -> Self {
        init_logger();
        let template = Template::compile(source).expect("template compiles");
        let tree = template.render(&data(initial)).expect("initial render");
        let client = ClientView::from_wire(&stencil::to_wire(&tree)).expect("client decodes the wire tree");
        assert_eq!(client.render(), tree.render());
        Self {
            template,
            options,
            tree,
            client,
        }
    }

    pub fn tree(&self) -> &RenderTree {
        &self.tree
    }

    pub fn client(&self) -> &ClientView {
        &self.client
    }

    /// Renders `next`, applies the resulting fragments on the client and
    /// checks the client now shows exactly what the template prints.
    pub fn update(&mut self, next: Json) -> Vec<Fragment> {
        let next = data(next);
        let tree = self.template.render(&next).expect("render");
        let fragments = stencil::diff_with(&self.tree, &tree, &self.options);
        self.client
            .apply_all(&fragments)
            .unwrap_or_else(|error| panic!("applying {fragments:#?} failed: {error}"));
        let expected = self.template.execute(&next).expect("execute");
        assert_eq!(self.client.render(), expected, "client diverged after {fragments:#?}");
        assert_eq!(tree.render(), expected);
        self.tree = tree;
        fragments
    }
}
