//! Identification of the resource kinds a benchmark operates on.

use std::fmt;

use kube::core::ApiResource;

/// A resource addressed by group, version and plural resource name.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct GroupVersionResource {
    /// The API group, empty for the core group.
    pub group: String,
    /// The API version within the group.
    pub version: String,
    /// The plural resource name used in request paths.
    pub resource: String,
}

impl GroupVersionResource {
    /// Creates a new descriptor.
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_owned(),
            version: version.to_owned(),
            resource: resource.to_owned(),
        }
    }

    /// The `Foo` custom resource.
    pub fn foos() -> Self {
        Self::new("stable.example.com", "v1", "foos")
    }

    /// The built-in `Endpoints` resource.
    pub fn endpoints() -> Self {
        Self::new("", "v1", "endpoints")
    }

    /// A resource no server serves.
    ///
    /// Scenarios whose resource tag cannot be resolved use this, so that the run fails at the
    /// first remote call instead of during resolution.
    pub fn not_found() -> Self {
        Self::new("", "error", "notfound")
    }

    /// Returns `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Builds the dynamic type information used by [`kube::Api`].
    ///
    /// Requests are addressed by plural name only, so the kind is left empty.
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: String::new(),
            plural: self.resource.clone(),
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// The resource kind of a scenario, and with it the client variant used to access it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResourceDescriptor {
    /// Any resource accessed as weakly-typed documents.
    Dynamic(GroupVersionResource),
    /// The built-in `Endpoints` kind accessed through its compiled-in type.
    Endpoints,
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dynamic(gvr) => write!(f, "dynamic {gvr}"),
            Self::Endpoints => write!(f, "typed v1/endpoints"),
        }
    }
}
