//! Accessibility-tree extraction.
//!
//! Capture events reference windows by handle; by the time an event is
//! processed the window may already be gone (a "phantom window"), so the
//! extractor probes liveness before walking anything. The platform bridge is
//! behind [`UiTreeSource`] - on hosts without an accessibility API the
//! [`NullUiTreeSource`] reports every window as phantom and the pipeline
//! falls through to OCR.

use serde::Serialize;
use std::collections::VecDeque;

pub type UiNodeId = u64;

pub const DEFAULT_MAX_DEPTH: usize = 5;
pub const DEFAULT_MAX_ELEMENTS: usize = 500;

/// One node of the accessibility tree. Empty fields are omitted from the
/// serialized form to keep prompts small.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UiElement {
    pub control_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_id: Option<String>,
}

/// Platform bridge to a live window's accessibility tree.
pub trait UiTreeSource: Send + Sync {
    /// Phantom-window probe: does the handle still resolve to a live window?
    fn window_exists(&self, hwnd: i64) -> bool;

    /// Root node of the window's tree, if resolvable.
    fn root(&self, hwnd: i64) -> Option<UiNodeId>;

    fn element(&self, node: UiNodeId) -> Option<UiElement>;

    fn children(&self, node: UiNodeId) -> Vec<UiNodeId>;
}

/// Source for hosts without an accessibility bridge: every window is phantom.
#[derive(Debug, Default)]
pub struct NullUiTreeSource;

impl UiTreeSource for NullUiTreeSource {
    fn window_exists(&self, _hwnd: i64) -> bool {
        false
    }

    fn root(&self, _hwnd: i64) -> Option<UiNodeId> {
        None
    }

    fn element(&self, _node: UiNodeId) -> Option<UiElement> {
        None
    }

    fn children(&self, _node: UiNodeId) -> Vec<UiNodeId> {
        Vec::new()
    }
}

#[derive(Serialize)]
struct TreeContext {
    hwnd: i64,
    elements_count: usize,
    elements: Vec<UiElement>,
}

/// Breadth-first walker with depth and element caps.
pub struct UiTreeExtractor {
    source: Box<dyn UiTreeSource>,
    max_depth: usize,
    max_elements: usize,
}

impl UiTreeExtractor {
    pub fn new(source: Box<dyn UiTreeSource>) -> Self {
        Self {
            source,
            max_depth: DEFAULT_MAX_DEPTH,
            max_elements: DEFAULT_MAX_ELEMENTS,
        }
    }

    pub fn with_limits(mut self, max_depth: usize, max_elements: usize) -> Self {
        self.max_depth = max_depth;
        self.max_elements = max_elements;
        self
    }

    /// Extract the window's tree as a JSON string, or `None` when the window
    /// is phantom or yields nothing.
    pub fn extract_context(&self, hwnd: i64) -> Option<String> {
        if !self.source.window_exists(hwnd) {
            tracing::debug!(hwnd, "phantom window detected");
            return None;
        }

        let root = self.source.root(hwnd)?;
        let elements = self.walk(root);
        if elements.is_empty() {
            return None;
        }

        let context = TreeContext {
            hwnd,
            elements_count: elements.len(),
            elements,
        };
        match serde_json::to_string(&context) {
            Ok(json) => Some(json),
            Err(err) => {
                tracing::debug!(hwnd, %err, "failed to serialize tree");
                None
            }
        }
    }

    fn walk(&self, root: UiNodeId) -> Vec<UiElement> {
        let mut elements = Vec::new();
        let mut queue: VecDeque<(UiNodeId, usize)> = VecDeque::new();
        queue.push_back((root, 0));

        while let Some((node, depth)) = queue.pop_front() {
            if elements.len() >= self.max_elements {
                break;
            }

            if let Some(element) = self.source.element(node) {
                elements.push(element);
            }

            if depth < self.max_depth {
                for child in self.source.children(node) {
                    queue.push_back((child, depth + 1));
                }
            }
        }

        elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Fixed tree: node ids map to (element, children).
    struct FakeTree {
        alive: bool,
        nodes: HashMap<UiNodeId, (UiElement, Vec<UiNodeId>)>,
    }

    impl UiTreeSource for FakeTree {
        fn window_exists(&self, _hwnd: i64) -> bool {
            self.alive
        }

        fn root(&self, _hwnd: i64) -> Option<UiNodeId> {
            self.alive.then_some(0)
        }

        fn element(&self, node: UiNodeId) -> Option<UiElement> {
            self.nodes.get(&node).map(|(e, _)| e.clone())
        }

        fn children(&self, node: UiNodeId) -> Vec<UiNodeId> {
            self.nodes
                .get(&node)
                .map(|(_, c)| c.clone())
                .unwrap_or_default()
        }
    }

    fn named(control: &str, name: &str) -> UiElement {
        UiElement {
            control_type: control.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    fn chain(depth: usize) -> FakeTree {
        // 0 -> 1 -> 2 -> ... a straight line of `depth + 1` nodes.
        let mut nodes = HashMap::new();
        for i in 0..=depth as u64 {
            let children = if i < depth as u64 { vec![i + 1] } else { vec![] };
            nodes.insert(i, (named("Pane", &format!("n{i}")), children));
        }
        FakeTree { alive: true, nodes }
    }

    #[test]
    fn phantom_window_yields_none() {
        let extractor = UiTreeExtractor::new(Box::new(FakeTree {
            alive: false,
            nodes: HashMap::new(),
        }));
        assert_eq!(extractor.extract_context(42), None);
    }

    #[test]
    fn null_source_always_phantom() {
        let extractor = UiTreeExtractor::new(Box::new(NullUiTreeSource));
        assert_eq!(extractor.extract_context(42), None);
    }

    #[test]
    fn walks_breadth_first_and_serializes() {
        let mut nodes = HashMap::new();
        nodes.insert(0, (named("Window", "root"), vec![1, 2]));
        nodes.insert(1, (named("Button", "ok"), vec![]));
        nodes.insert(2, (named("Edit", "input"), vec![]));
        let extractor = UiTreeExtractor::new(Box::new(FakeTree { alive: true, nodes }));

        let json = extractor.extract_context(7).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["hwnd"], 7);
        assert_eq!(parsed["elements_count"], 3);
        assert_eq!(parsed["elements"][0]["name"], "root");
        assert_eq!(parsed["elements"][1]["name"], "ok");
    }

    #[test]
    fn empty_fields_are_omitted() {
        let mut nodes = HashMap::new();
        nodes.insert(
            0,
            (
                UiElement {
                    control_type: "Pane".into(),
                    ..Default::default()
                },
                vec![],
            ),
        );
        let extractor = UiTreeExtractor::new(Box::new(FakeTree { alive: true, nodes }));

        let json = extractor.extract_context(1).unwrap();
        assert!(!json.contains("\"name\""));
        assert!(!json.contains("\"automation_id\""));
    }

    #[test]
    fn depth_cap_prunes_deep_branches() {
        let extractor =
            UiTreeExtractor::new(Box::new(chain(10))).with_limits(3, DEFAULT_MAX_ELEMENTS);
        let json = extractor.extract_context(1).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        // Root at depth 0 plus three more levels.
        assert_eq!(parsed["elements_count"], 4);
    }

    #[test]
    fn element_cap_stops_the_walk() {
        let mut nodes = HashMap::new();
        let children: Vec<UiNodeId> = (1..=20).collect();
        nodes.insert(0, (named("Window", "root"), children.clone()));
        for id in children {
            nodes.insert(id, (named("Item", &format!("i{id}")), vec![]));
        }
        let extractor =
            UiTreeExtractor::new(Box::new(FakeTree { alive: true, nodes })).with_limits(5, 5);

        let json = extractor.extract_context(1).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["elements_count"], 5);
    }
}
