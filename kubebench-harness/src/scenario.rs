//! Resolution of scenario names into explicit configurations.
//!
//! A scenario name is a sequence of `_`-separated tags, optionally prefixed with `Benchmark`, for
//! example `List_WatchCache_CR_Validation_LargeData`. Tags are matched as whole words, so
//! `WatchCache` never selects the `Watch` operation. The name is inspected along independent axes:
//!
//! | axis        | tags                                         | default                |
//! |-------------|----------------------------------------------|------------------------|
//! | operation   | `CreateLatency`, `CreateThroughput`, `List`, `Watch` | none, required |
//! | resource    | `Typed`, `CR`, `Dynamic` + `Endpoints`       | the not-found resource |
//! | size class  | `LargeData`, `LargeMetadata`                 | the empty namespace    |
//! | consistency | `WatchCache`                                 | strongly consistent    |
//! | validation  | `Validation`                                 | disabled               |
//!
//! When both size tags are present, `LargeData` takes precedence. Unrecognized tags are ignored.

use std::fmt;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::client::ListOptions;
use crate::error::{Error, Result};
use crate::payload::generate_payload;
use crate::resource::{GroupVersionResource, ResourceDescriptor};
use crate::template::{FieldPath, Template};

/// Namespace used by scenarios without a size tag.
pub const EMPTY_NAMESPACE: &str = "empty";
/// Namespace used by `LargeData` scenarios.
pub const LARGE_DATA_NAMESPACE: &str = "large-data";
/// Namespace used by `LargeMetadata` scenarios.
pub const LARGE_METADATA_NAMESPACE: &str = "large-metadata";

/// All namespaces a benchmark run may use.
pub const NAMESPACES: &[&str] = &[EMPTY_NAMESPACE, LARGE_DATA_NAMESPACE, LARGE_METADATA_NAMESPACE];

/// The built-in scenarios.
pub const SCENARIOS: &[&str] = &[
    "CreateLatency_CR_Validation",
    "CreateLatency_CR_Validation_LargeData",
    "CreateLatency_CR_LargeMetadata",
    "CreateLatency_Typed_Endpoints",
    "CreateLatency_Dynamic_Endpoints",
    "CreateThroughput_CR_Validation",
    "CreateThroughput_CR_Validation_LargeData",
    "CreateThroughput_Typed_Endpoints",
    "List_CR_Validation",
    "List_CR_Validation_LargeData",
    "List_WatchCache_CR_Validation",
    "List_WatchCache_CR_Validation_LargeData",
    "List_Typed_Endpoints",
    "Watch_CR",
];

/// The timed operation of a scenario.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Sequential creates.
    CreateLatency,
    /// A burst of concurrent creates.
    CreateThroughput,
    /// Sequential lists of a populated collection.
    List,
    /// Fan-out of creates to many watchers.
    Watch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateLatency => "create latency",
            Self::CreateThroughput => "create throughput",
            Self::List => "list",
            Self::Watch => "watch",
        };
        f.write_str(name)
    }
}

/// Size class of the created objects, each with its own namespace.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SizeClass {
    /// Objects as defined by the template.
    Default,
    /// Objects with an enlarged payload field.
    LargeData,
    /// Objects with an enlarged annotation.
    LargeMetadata,
}

impl SizeClass {
    /// Returns the namespace that holds objects of this class.
    pub fn namespace(self) -> &'static str {
        match self {
            Self::Default => EMPTY_NAMESPACE,
            Self::LargeData => LARGE_DATA_NAMESPACE,
            Self::LargeMetadata => LARGE_METADATA_NAMESPACE,
        }
    }
}

/// The tags found in a scenario name, one value per axis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tags {
    /// The timed operation, if named.
    pub operation: Option<Operation>,
    /// The resource and client variant.
    pub descriptor: ResourceDescriptor,
    /// Whether objects use the custom resource template.
    pub custom_resource: bool,
    /// The size class of created objects.
    pub size: SizeClass,
    /// Whether lists may be served from the watch cache.
    pub watch_cache: bool,
    /// Whether the validation rule is installed.
    pub validation: bool,
}

impl Tags {
    /// Inspects a scenario name.
    pub fn parse(name: &str) -> Self {
        let tags: Vec<&str> = name
            .split('_')
            .filter(|tag| !tag.is_empty() && *tag != "Benchmark")
            .collect();
        let has = |tag: &str| tags.contains(&tag);

        let operation = tags.iter().find_map(|tag| match *tag {
            "CreateLatency" => Some(Operation::CreateLatency),
            "CreateThroughput" => Some(Operation::CreateThroughput),
            "List" => Some(Operation::List),
            "Watch" => Some(Operation::Watch),
            _ => None,
        });

        let custom_resource = has("CR");
        let descriptor = if has("Typed") {
            ResourceDescriptor::Endpoints
        } else if custom_resource {
            ResourceDescriptor::Dynamic(GroupVersionResource::foos())
        } else if has("Endpoints") && has("Dynamic") {
            ResourceDescriptor::Dynamic(GroupVersionResource::endpoints())
        } else {
            ResourceDescriptor::Dynamic(GroupVersionResource::not_found())
        };

        let size = if has("LargeData") {
            SizeClass::LargeData
        } else if has("LargeMetadata") {
            SizeClass::LargeMetadata
        } else {
            SizeClass::Default
        };

        for tag in &tags {
            if !KNOWN_TAGS.contains(tag) {
                tracing::debug!(scenario = name, tag, "ignoring unknown scenario tag");
            }
        }

        Self {
            operation,
            descriptor,
            custom_resource,
            size,
            watch_cache: has("WatchCache"),
            validation: has("Validation"),
        }
    }
}

const KNOWN_TAGS: &[&str] = &[
    "CreateLatency",
    "CreateThroughput",
    "List",
    "Watch",
    "CR",
    "Typed",
    "Dynamic",
    "Endpoints",
    "LargeData",
    "LargeMetadata",
    "WatchCache",
    "Validation",
];

/// Everything needed to run one scenario.
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    /// The scenario name as given.
    pub name: String,
    /// The timed operation.
    pub operation: Operation,
    /// The resource and client variant.
    pub descriptor: ResourceDescriptor,
    /// The namespace all objects are created in.
    pub namespace: String,
    /// The shape of created objects.
    pub template: Template,
    /// Consistency options for list and watch.
    pub list_options: ListOptions,
    /// Whether the validation rule must be installed.
    pub validation: bool,
}

/// The base templates scenarios are built from.
#[derive(Clone, Debug)]
pub struct Templates {
    /// Template for custom resource scenarios.
    pub custom_resource: Template,
    /// Template for all other scenarios.
    pub endpoints: Template,
}

impl Templates {
    /// Returns the built-in templates.
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            custom_resource: Template::foo()?,
            endpoints: Template::endpoints()?,
        })
    }
}

/// A builder for creating a [`Resolver`].
#[derive(Debug)]
pub struct ResolverBuilder {
    templates: Templates,
    large_data_size: usize,
    large_metadata_size: usize,
    seed: u64,
}

impl ResolverBuilder {
    /// Size in bytes of the generated payload in `LargeData` scenarios.
    pub fn large_data_size(mut self, size: usize) -> Self {
        self.large_data_size = size;
        self
    }

    /// Size in bytes of the generated annotation in `LargeMetadata` scenarios.
    pub fn large_metadata_size(mut self, size: usize) -> Self {
        self.large_metadata_size = size;
        self
    }

    /// Seed for the payload generator, making generated objects reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Creates the resolver.
    pub fn build(self) -> Resolver {
        Resolver {
            templates: self.templates,
            large_data_size: self.large_data_size,
            large_metadata_size: self.large_metadata_size,
            rng: SmallRng::seed_from_u64(self.seed),
        }
    }
}

/// Maps scenario names to [`ScenarioConfig`]s.
#[derive(Debug)]
pub struct Resolver {
    templates: Templates,
    large_data_size: usize,
    large_metadata_size: usize,
    rng: SmallRng,
}

impl Resolver {
    /// Constructs a new resolver builder using the given base templates.
    pub fn builder(templates: Templates) -> ResolverBuilder {
        ResolverBuilder {
            templates,
            large_data_size: 10_000,
            large_metadata_size: 10_000,
            seed: rand::random(),
        }
    }

    /// Resolves a scenario name.
    ///
    /// Fails if the name does not contain an operation or the template for its size class cannot
    /// be enlarged. An unknown resource resolves to [`GroupVersionResource::not_found`].
    pub fn resolve(&mut self, name: &str) -> Result<ScenarioConfig> {
        let tags = Tags::parse(name);
        let operation = tags
            .operation
            .ok_or_else(|| Error::UnknownOperation(name.to_owned()))?;

        let base = if tags.custom_resource {
            &self.templates.custom_resource
        } else {
            &self.templates.endpoints
        };

        let template = match tags.size {
            SizeClass::Default => base.clone(),
            SizeClass::LargeData => generate_payload(
                base,
                self.large_data_size,
                &FieldPath::spec_data(),
                &mut self.rng,
            )?,
            SizeClass::LargeMetadata => generate_payload(
                base,
                self.large_metadata_size,
                &FieldPath::filler_annotation(),
                &mut self.rng,
            )?,
        };

        let list_options = if tags.watch_cache {
            ListOptions::any()
        } else {
            ListOptions::consistent()
        };

        Ok(ScenarioConfig {
            name: name.to_owned(),
            operation,
            descriptor: tags.descriptor,
            namespace: tags.size.namespace().to_owned(),
            template,
            list_options,
            validation: tags.validation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::is_filler;

    fn resolver() -> Resolver {
        Resolver::builder(Templates::builtin().unwrap())
            .large_data_size(500)
            .large_metadata_size(300)
            .seed(1)
            .build()
    }

    #[test]
    fn resolves_default_scenario() {
        let config = resolver().resolve("CreateLatency_CR_Validation").unwrap();

        assert_eq!(config.operation, Operation::CreateLatency);
        assert_eq!(
            config.descriptor,
            ResourceDescriptor::Dynamic(GroupVersionResource::foos())
        );
        assert_eq!(config.namespace, EMPTY_NAMESPACE);
        assert_eq!(config.template, Template::foo().unwrap());
        assert_eq!(config.list_options, ListOptions::consistent());
        assert!(config.validation);
    }

    #[test]
    fn resolves_large_data() {
        let config = resolver()
            .resolve("Benchmark_List_CR_Validation_LargeData")
            .unwrap();

        assert_eq!(config.operation, Operation::List);
        assert_eq!(config.namespace, LARGE_DATA_NAMESPACE);

        let data = config.template.get(&FieldPath::spec_data()).unwrap();
        let data = data.as_str().unwrap();
        assert!(data.len() >= 499 && data.len() <= 500);
        assert!(is_filler(data));
    }

    #[test]
    fn resolves_large_metadata() {
        let config = resolver()
            .resolve("CreateLatency_Typed_Endpoints_LargeMetadata")
            .unwrap();

        assert_eq!(config.descriptor, ResourceDescriptor::Endpoints);
        assert_eq!(config.namespace, LARGE_METADATA_NAMESPACE);
        let filler = config.template.get(&FieldPath::filler_annotation()).unwrap();
        assert!(filler.as_str().unwrap().len() >= 299);
        assert!(!config.validation);
    }

    #[test]
    fn large_data_takes_precedence() {
        let tags = Tags::parse("List_CR_LargeMetadata_LargeData");
        assert_eq!(tags.size, SizeClass::LargeData);
    }

    #[test]
    fn watch_cache_is_not_watch() {
        let tags = Tags::parse("List_WatchCache_CR");
        assert_eq!(tags.operation, Some(Operation::List));
        assert!(tags.watch_cache);

        let config = resolver().resolve("List_WatchCache_CR").unwrap();
        assert_eq!(config.list_options, ListOptions::any());

        let tags = Tags::parse("Watch_CR");
        assert_eq!(tags.operation, Some(Operation::Watch));
        assert!(!tags.watch_cache);
    }

    #[test]
    fn resource_axis() {
        assert_eq!(
            Tags::parse("List_Typed_Endpoints").descriptor,
            ResourceDescriptor::Endpoints
        );
        assert_eq!(
            Tags::parse("List_Dynamic_Endpoints").descriptor,
            ResourceDescriptor::Dynamic(GroupVersionResource::endpoints())
        );
        assert_eq!(
            Tags::parse("List_Endpoints").descriptor,
            ResourceDescriptor::Dynamic(GroupVersionResource::not_found())
        );
    }

    #[test]
    fn unknown_resource_uses_endpoints_template() {
        let config = resolver().resolve("CreateLatency_Something").unwrap();
        assert_eq!(
            config.descriptor,
            ResourceDescriptor::Dynamic(GroupVersionResource::not_found())
        );
        assert_eq!(config.template, Template::endpoints().unwrap());
    }

    #[test]
    fn missing_operation_fails() {
        let err = resolver().resolve("CR_Validation").unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(name) if name == "CR_Validation"));
    }

    #[test]
    fn large_data_requires_payload_field() {
        let err = resolver().resolve("List_Typed_Endpoints_LargeData").unwrap_err();
        assert!(matches!(err, Error::FieldPath { .. }));
    }

    #[test]
    fn builtin_scenarios_resolve() {
        let mut resolver = resolver();
        for name in SCENARIOS {
            resolver.resolve(name).unwrap();
        }
    }
}
