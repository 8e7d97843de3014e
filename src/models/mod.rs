//! Data model: requests, collection trees and execution results

pub mod collection;
pub mod request;
pub mod result;

pub use collection::{Collection, CollectionSpec, Folder, FolderSpec, ItemSpec, Node, NodeId, NodeKind};
pub use request::{Body, FormPart, FormPartValue, KeyValue, Request, RequestOverrides};
pub use result::{BodyType, CookieRecord, ExecutionResult, StepStatus, TestResult};
