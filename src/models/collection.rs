//! Collection tree
//!
//! Folders and requests live in a flat arena addressed by [`NodeId`]. Parent
//! links are plain indices, so walking up the tree never recurses and a
//! malformed parent chain can be detected with a visited set.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::auth::{self, AuthConfig};
use crate::errors::{ReqflowError, Result};
use crate::models::request::Request;

/// Index of a node inside a [`Collection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub auth: AuthConfig,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Folder(Folder),
    Request(Box<Request>),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Folder(f) => &f.name,
            NodeKind::Request(r) => &r.name,
        }
    }

    pub fn id(&self) -> &str {
        match &self.kind {
            NodeKind::Folder(f) => &f.id,
            NodeKind::Request(r) => &r.id,
        }
    }

    pub fn auth(&self) -> &AuthConfig {
        match &self.kind {
            NodeKind::Folder(f) => &f.auth,
            NodeKind::Request(r) => &r.auth,
        }
    }

    pub fn as_request(&self) -> Option<&Request> {
        match &self.kind {
            NodeKind::Request(r) => Some(r),
            NodeKind::Folder(_) => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder(_))
    }
}

/// An ordered tree of folders and requests
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    /// Collection-scope variables
    pub variables: IndexMap<String, String>,
    nodes: Vec<Node>,
    root: NodeId,
}

impl Collection {
    /// Create a collection whose root folder carries `auth`
    pub fn new(name: impl Into<String>, auth: AuthConfig) -> Self {
        let name = name.into();
        let root = Node {
            parent: None,
            kind: NodeKind::Folder(Folder {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.clone(),
                auth,
                children: Vec::new(),
            }),
        };
        Self {
            name,
            variables: IndexMap::new(),
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ReqflowError::EntityNotFound(format!("node #{}", id.0)))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Folder(f)) => &f.children,
            _ => &[],
        }
    }

    pub fn add_folder(&mut self, parent: NodeId, name: impl Into<String>, auth: AuthConfig) -> Result<NodeId> {
        let folder = Folder {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            auth,
            children: Vec::new(),
        };
        self.push_child(parent, NodeKind::Folder(folder))
    }

    pub fn add_request(&mut self, parent: NodeId, mut request: Request) -> Result<NodeId> {
        request.order = self.children(parent).len() as u32;
        self.push_child(parent, NodeKind::Request(Box::new(request)))
    }

    fn push_child(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        match self.nodes.get_mut(parent.0).map(|n| &mut n.kind) {
            Some(NodeKind::Folder(f)) => f.children.push(id),
            Some(NodeKind::Request(_)) => {
                return Err(ReqflowError::InvalidRequest(format!(
                    "node #{} is a request and cannot have children",
                    parent.0
                )))
            }
            None => return Err(ReqflowError::EntityNotFound(format!("folder #{}", parent.0))),
        }
        self.nodes.push(Node {
            parent: Some(parent),
            kind,
        });
        Ok(id)
    }

    /// Re-point a node's parent link without touching child lists.
    ///
    /// Trees materialized from external storage can carry arbitrary parent
    /// references; this mirrors that for callers assembling such trees.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or_else(|| ReqflowError::EntityNotFound(format!("node #{}", id.0)))?;
        node.parent = parent;
        Ok(())
    }

    /// Authorization that applies to `id` after following inherit links
    pub fn effective_auth(&self, id: NodeId) -> Result<AuthConfig> {
        auth::resolve_inherited(self, id)
    }

    /// Request leaves in depth-first order
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match &self.nodes[id.0].kind {
                NodeKind::Request(_) => out.push(id),
                NodeKind::Folder(f) => stack.extend(f.children.iter().rev().copied()),
            }
        }
        out
    }

    /// Find a request by exact name or id
    pub fn find_request(&self, name_or_id: &str) -> Option<NodeId> {
        self.leaves().into_iter().find(|id| {
            self.nodes[id.0]
                .as_request()
                .is_some_and(|r| r.matches(name_or_id))
        })
    }

    /// Build a collection from its serialized description
    pub fn from_spec(spec: CollectionSpec) -> Result<Self> {
        let mut collection = Collection::new(spec.name, spec.auth);
        collection.variables = spec.variables;
        let root = collection.root();
        let mut pending: Vec<(NodeId, Vec<ItemSpec>)> = vec![(root, spec.items)];
        while let Some((parent, items)) = pending.pop() {
            for item in items {
                match item {
                    ItemSpec::Folder(folder) => {
                        let id = collection.add_folder(parent, folder.name, folder.auth)?;
                        pending.push((id, folder.items));
                    }
                    ItemSpec::Request(request) => {
                        collection.add_request(parent, *request)?;
                    }
                }
            }
        }
        Ok(collection)
    }

    /// Load a YAML or JSON collection file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let spec: CollectionSpec = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Self::from_spec(spec)
    }
}

/// Serialized collection description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default = "root_auth")]
    pub auth: AuthConfig,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, String>,
    #[serde(default)]
    pub items: Vec<ItemSpec>,
}

fn root_auth() -> AuthConfig {
    AuthConfig::None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemSpec {
    Folder(FolderSpec),
    Request(Box<Request>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSpec {
    pub name: String,
    #[serde(default)]
    pub auth: AuthConfig,
    pub items: Vec<ItemSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Collection, NodeId, NodeId, NodeId) {
        let mut c = Collection::new("api", AuthConfig::None);
        let root = c.root();
        let folder = c.add_folder(root, "Folder A", AuthConfig::InheritFromParent).unwrap();
        let x = c.add_request(folder, Request::new("ReqX", "GET", "http://x")).unwrap();
        c.add_request(folder, Request::new("ReqY", "GET", "http://y")).unwrap();
        let z = c.add_request(root, Request::new("ReqZ", "GET", "http://z")).unwrap();
        (c, folder, x, z)
    }

    #[test]
    fn test_leaves_depth_first() {
        let (c, _, _, _) = sample();
        let names: Vec<_> = c
            .leaves()
            .into_iter()
            .map(|id| c.node(id).unwrap().name().to_string())
            .collect();
        assert_eq!(names, ["ReqX", "ReqY", "ReqZ"]);
    }

    #[test]
    fn test_request_cannot_have_children() {
        let (mut c, _, x, _) = sample();
        assert!(c.add_request(x, Request::new("bad", "GET", "http://b")).is_err());
    }

    #[test]
    fn test_find_request() {
        let (c, _, _, z) = sample();
        assert_eq!(c.find_request("ReqZ"), Some(z));
        assert_eq!(c.find_request("nope"), None);
    }

    #[test]
    fn test_sibling_order_assigned() {
        let (c, folder, _, _) = sample();
        let orders: Vec<u32> = c
            .children(folder)
            .iter()
            .map(|id| c.node(*id).unwrap().as_request().unwrap().order)
            .collect();
        assert_eq!(orders, [0, 1]);
    }

    #[test]
    fn test_from_yaml_spec() {
        let yaml = r#"
name: shop
variables:
  base: http://localhost
items:
  - name: Auth
    auth:
      type: bearer
      token: abc
    items:
      - name: Login
        method: POST
        url: ${base}/login
  - name: Health
    url: ${base}/health
"#;
        let spec: CollectionSpec = serde_yaml::from_str(yaml).unwrap();
        let c = Collection::from_spec(spec).unwrap();
        assert_eq!(c.variables.get("base").map(String::as_str), Some("http://localhost"));
        let leaves = c.leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(c.node(leaves[0]).unwrap().name(), "Login");
        let folder = c.parent(leaves[0]).unwrap();
        assert!(c.node(folder).unwrap().is_folder());
    }
}
