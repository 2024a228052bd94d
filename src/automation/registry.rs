//! Name-based lookup of functions and reconstructible classes.
//!
//! Tapes refer to callables and configuration classes by `module::name`. The
//! runner resolves those paths through a [`Registry`] populated up front by
//! each collaborator module.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::automation::args::{Arg, CallArgs};
use crate::automation::declarative::{ClassDescriptor, Declarative, DeclarativeObject};
use crate::automation::recordable::Recordable;
use crate::errors::ValidationError;
use crate::segmentation::{
    ByBins, ByGroup, CompositeSegmentation, SEGMENTATION_MODULE, SegmentationMethod, Temporal,
    TemporalByBins,
};
use crate::types::ModulePath;
use crate::{ingestion, metrics};

/// Native implementation of a callable.
pub type NativeFn = Arc<dyn Fn(&CallArgs) -> Result<Arg, ValidationError> + Send + Sync>;

/// Rebuilds a configuration object from its class descriptor.
pub type ClassConstructor =
    Arc<dyn Fn(&ClassDescriptor) -> Result<Arc<dyn DeclarativeObject>, ValidationError> + Send + Sync>;

/// A callable, optionally addressable by `module::name`.
#[derive(Clone)]
pub struct FunctionRef {
    path: Option<(ModulePath, String)>,
    func: NativeFn,
}

impl FunctionRef {
    /// A function that can be referenced from a tape.
    pub fn named<F>(module: impl Into<ModulePath>, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Arg, ValidationError> + Send + Sync + 'static,
    {
        Self {
            path: Some((module.into(), name.into())),
            func: Arc::new(func),
        }
    }

    /// A closure without a stable name. It can be called but never serialized.
    pub fn anonymous<F>(func: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Arg, ValidationError> + Send + Sync + 'static,
    {
        Self {
            path: None,
            func: Arc::new(func),
        }
    }

    pub(crate) fn from_native(path: Option<(ModulePath, String)>, func: NativeFn) -> Self {
        Self { path, func }
    }

    /// Module of a named function.
    pub fn module(&self) -> Option<&str> {
        self.path.as_ref().map(|(module, _)| module.as_str())
    }

    /// Name of a named function.
    pub fn name(&self) -> Option<&str> {
        self.path.as_ref().map(|(_, name)| name.as_str())
    }

    /// `module::name`, or `<anonymous>`.
    pub fn qualified_name(&self) -> String {
        match &self.path {
            Some((module, name)) => format!("{module}::{name}"),
            None => "<anonymous>".to_string(),
        }
    }

    /// Invoke the function.
    pub fn call(&self, args: &CallArgs) -> Result<Arg, ValidationError> {
        (self.func)(args)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// A function with some arguments already bound.
#[derive(Clone, Debug)]
pub struct Partial {
    /// Function being bound.
    pub function: FunctionRef,
    /// Bound positional arguments.
    pub args: Vec<Arg>,
    /// Bound keyword arguments.
    pub keywords: IndexMap<String, Arg>,
}

impl Partial {
    /// A partial with nothing bound yet.
    pub fn new(function: FunctionRef) -> Self {
        Self {
            function,
            args: Vec::new(),
            keywords: IndexMap::new(),
        }
    }

    /// Bind the next positional argument.
    pub fn with_arg(mut self, value: impl Into<Arg>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Bind a keyword argument.
    pub fn with_keyword(mut self, key: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.keywords.insert(key.into(), value.into());
        self
    }

    /// Call with bound positionals first and call-site keywords overriding bound ones.
    pub fn call(&self, extra: &CallArgs) -> Result<Arg, ValidationError> {
        let mut merged = extra.clone();
        merged.args = self.args.iter().cloned().chain(extra.args.iter().cloned()).collect();
        merged.kwargs = self.keywords.clone();
        for (key, value) in &extra.kwargs {
            merged.kwargs.insert(key.clone(), value.clone());
        }
        self.function.call(&merged)
    }
}

/// Functions and class constructors addressable by `module::name`.
#[derive(Clone, Default)]
pub struct Registry {
    functions: HashMap<String, FunctionRef>,
    classes: HashMap<String, ClassConstructor>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the segmentation classes, ingestion functions and metrics.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for class in [
            ByGroup::CLASS,
            ByBins::CLASS,
            TemporalByBins::CLASS,
            Temporal::CLASS,
            CompositeSegmentation::CLASS,
        ] {
            registry.register_class(SEGMENTATION_MODULE, class, |descriptor| {
                SegmentationMethod::from_class(descriptor)
                    .map(|method| Arc::new(method) as Arc<dyn DeclarativeObject>)
            });
        }
        ingestion::register(&mut registry);
        metrics::register(&mut registry);
        registry
    }

    /// Register a named function.
    pub fn register_function<F>(
        &mut self,
        module: impl Into<ModulePath>,
        name: impl Into<String>,
        func: F,
    ) -> &mut Self
    where
        F: Fn(&CallArgs) -> Result<Arg, ValidationError> + Send + Sync + 'static,
    {
        self.register(FunctionRef::named(module, name, func))
    }

    /// Register a function reference under its own path; anonymous references are ignored.
    pub fn register(&mut self, function: FunctionRef) -> &mut Self {
        if function.path.is_some() {
            self.functions.insert(function.qualified_name(), function);
        }
        self
    }

    /// Register a recordable so that replayed calls are themselves recordable.
    pub fn register_recordable(&mut self, recordable: &Recordable) -> &mut Self {
        self.register(recordable.function_ref())
    }

    /// Register a constructor for class descriptors named `module::name`.
    pub fn register_class<F>(
        &mut self,
        module: impl Into<ModulePath>,
        name: impl Into<String>,
        constructor: F,
    ) -> &mut Self
    where
        F: Fn(&ClassDescriptor) -> Result<Arc<dyn DeclarativeObject>, ValidationError>
            + Send
            + Sync
            + 'static,
    {
        self.classes.insert(
            format!("{}::{}", module.into(), name.into()),
            Arc::new(constructor),
        );
        self
    }

    /// Look up a function by module and name.
    pub fn function(&self, module: &str, name: &str) -> Result<FunctionRef, ValidationError> {
        self.functions
            .get(&format!("{module}::{name}"))
            .cloned()
            .ok_or_else(|| ValidationError::UnresolvedReference {
                module: module.to_string(),
                name: name.to_string(),
            })
    }

    /// Rebuild the object a class descriptor declares.
    pub fn construct(
        &self,
        descriptor: &ClassDescriptor,
    ) -> Result<Arc<dyn DeclarativeObject>, ValidationError> {
        let constructor =
            self.classes
                .get(&descriptor.path())
                .ok_or_else(|| ValidationError::UnresolvedReference {
                    module: descriptor.module.clone(),
                    name: descriptor.name.clone(),
                })?;
        constructor(descriptor)
    }

    /// True when `module::name` resolves to a function.
    pub fn contains_function(&self, module: &str, name: &str) -> bool {
        self.functions.contains_key(&format!("{module}::{name}"))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        let mut classes: Vec<&String> = self.classes.keys().collect();
        classes.sort();
        f.debug_struct("Registry")
            .field("functions", &functions)
            .field("classes", &classes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add(args: &CallArgs) -> Result<Arg, ValidationError> {
        let x = args.require_f64("add", 0, "x")?;
        let y = args.require_f64("add", 1, "y")?;
        Ok(Arg::Number(x + y))
    }

    #[test]
    fn unknown_paths_are_unresolved_references() {
        let registry = Registry::new();
        let err = registry.function("nowhere", "f").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnresolvedReference { ref module, ref name }
                if module == "nowhere" && name == "f"
        ));
    }

    #[test]
    fn partial_binds_leading_positionals() {
        let mut registry = Registry::new();
        registry.register_function("tests", "add", add);
        let partial = Partial::new(registry.function("tests", "add").unwrap()).with_arg(2.0);
        let sum = partial.call(&CallArgs::positional([3.0])).unwrap();
        assert_eq!(sum.as_f64(), Some(5.0));
    }

    #[test]
    fn builtins_construct_segmentation_methods() {
        let registry = Registry::with_builtins();
        let descriptor = ClassDescriptor {
            module: SEGMENTATION_MODULE.to_string(),
            name: "ByBins".to_string(),
            dict: json!({ "bins": [1.0, 2.0] }),
        };
        let object = registry.construct(&descriptor).unwrap();
        let method = object.as_any().downcast_ref::<SegmentationMethod>().unwrap();
        assert_eq!(method.class_name(), "ByBins");
        assert!(registry.contains_function("crval::ingestion", "from_csv"));
    }
}
