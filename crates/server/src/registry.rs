//! Actor constructors known to the server.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::actor::{ActorFactory, RootActor, RootActorFactory};
use crate::connection::DebuggerServerConnection;
use crate::error::ServerError;

type FactoryMap = BTreeMap<String, Rc<dyn ActorFactory>>;

/// Names that would collide with fields of the `listTabs` reply.
const RESERVED_GLOBAL_NAMES: &[&str] = &["from", "tabs", "selected"];
/// Names that would collide with fields of a tab's form.
const RESERVED_TAB_NAMES: &[&str] = &["title", "url", "actor"];

/// A set of actor definitions layered into the server.
pub trait ActorModule {
    /// Modules are loaded at most once per name.
    fn name(&self) -> &str;

    fn install(&self, registry: &mut ActorRegistry) -> Result<(), ServerError>;
}

/// Root actor constructor plus the global and tab actor factories
/// registered at runtime.
#[derive(Default)]
pub struct ActorRegistry {
    root: Option<Box<dyn RootActorFactory>>,
    global_factories: Option<FactoryMap>,
    tab_factories: Option<FactoryMap>,
    modules: BTreeSet<String>,
}

impl ActorRegistry {
    /// An uninitialized registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self) {
        self.global_factories.get_or_insert_with(FactoryMap::new);
        self.tab_factories.get_or_insert_with(FactoryMap::new);
    }

    pub fn is_initialized(&self) -> bool {
        self.global_factories.is_some()
    }

    /// Forget every module and factory.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_root_actor(&mut self, constructor: impl RootActorFactory) {
        self.root = Some(Box::new(constructor));
    }

    pub fn has_root_actor(&self) -> bool {
        self.root.is_some()
    }

    pub fn create_root_actor(
        &self,
        conn: &DebuggerServerConnection,
    ) -> Result<Box<dyn RootActor>, ServerError> {
        let root = self.root.as_ref().ok_or(ServerError::NoRootActor)?;
        Ok(root.create_root(conn))
    }

    /// Install `module` unless a module with the same name is loaded.
    ///
    /// Returns whether the module was installed.
    pub fn add_module(&mut self, module: &dyn ActorModule) -> Result<bool, ServerError> {
        if !self.is_initialized() {
            return Err(ServerError::NotInitialized);
        }
        if self.modules.contains(module.name()) {
            tracing::debug!(module = module.name(), "actor module already loaded");
            return Ok(false);
        }
        module.install(self)?;
        self.modules.insert(module.name().to_owned());
        tracing::debug!(module = module.name(), "loaded actor module");
        Ok(true)
    }

    pub fn is_loaded(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    /// Register a factory instantiated once per connection by the root actor.
    ///
    /// `name` defaults to the factory's actor prefix. Returns the name used.
    pub fn add_global_actor(
        &mut self,
        factory: Rc<dyn ActorFactory>,
        name: Option<&str>,
    ) -> Result<String, ServerError> {
        register(&mut self.global_factories, RESERVED_GLOBAL_NAMES, factory, name)
    }

    /// Register a factory instantiated once per tab.
    pub fn add_tab_actor(
        &mut self,
        factory: Rc<dyn ActorFactory>,
        name: Option<&str>,
    ) -> Result<String, ServerError> {
        register(&mut self.tab_factories, RESERVED_TAB_NAMES, factory, name)
    }

    /// Drop every global registration of a factory with `factory`'s name.
    pub fn remove_global_actor(&mut self, factory: &dyn ActorFactory) -> Result<usize, ServerError> {
        unregister(&mut self.global_factories, factory)
    }

    pub fn remove_tab_actor(&mut self, factory: &dyn ActorFactory) -> Result<usize, ServerError> {
        unregister(&mut self.tab_factories, factory)
    }

    pub fn global_factories(&self) -> impl Iterator<Item = (&str, &Rc<dyn ActorFactory>)> {
        self.global_factories
            .iter()
            .flatten()
            .map(|(name, factory)| (name.as_str(), factory))
    }

    pub fn tab_factories(&self) -> impl Iterator<Item = (&str, &Rc<dyn ActorFactory>)> {
        self.tab_factories
            .iter()
            .flatten()
            .map(|(name, factory)| (name.as_str(), factory))
    }
}

impl fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("root", &self.root.is_some())
            .field("global_factories", &self.global_factories.as_ref().map(|m| m.keys().collect::<Vec<_>>()))
            .field("tab_factories", &self.tab_factories.as_ref().map(|m| m.keys().collect::<Vec<_>>()))
            .field("modules", &self.modules)
            .finish()
    }
}

fn register(
    factories: &mut Option<FactoryMap>,
    reserved: &[&str],
    factory: Rc<dyn ActorFactory>,
    name: Option<&str>,
) -> Result<String, ServerError> {
    let factories = factories.as_mut().ok_or(ServerError::NotInitialized)?;
    let name = match name {
        Some(name) => name,
        None => factory.actor_prefix().ok_or(ServerError::UnnamedFactory)?,
    }
    .to_owned();

    if reserved.contains(&name.as_str()) {
        return Err(ServerError::ReservedName(name));
    }
    if factories.contains_key(&name) {
        return Err(ServerError::DuplicateName(name));
    }
    tracing::debug!(%name, factory = factory.name(), "registered actor factory");
    factories.insert(name.clone(), factory);
    Ok(name)
}

fn unregister(
    factories: &mut Option<FactoryMap>,
    factory: &dyn ActorFactory,
) -> Result<usize, ServerError> {
    let factories = factories.as_mut().ok_or(ServerError::NotInitialized)?;
    let before = factories.len();
    factories.retain(|_, registered| registered.name() != factory.name());
    Ok(before - factories.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, FactoryContext, FnFactory};

    fn factory(name: &str) -> Rc<dyn ActorFactory> {
        Rc::new(FnFactory::new(name, |_ctx: &FactoryContext<'_>| -> eyre::Result<Box<dyn Actor>> {
            eyre::bail!("never instantiated")
        }))
    }

    struct Prefixless;

    impl ActorFactory for Prefixless {
        fn name(&self) -> &str {
            "prefixless"
        }

        fn create(&self, _ctx: &FactoryContext<'_>) -> eyre::Result<Box<dyn Actor>> {
            eyre::bail!("never instantiated")
        }
    }

    struct Module(&'static str);

    impl ActorModule for Module {
        fn name(&self) -> &str {
            self.0
        }

        fn install(&self, registry: &mut ActorRegistry) -> Result<(), ServerError> {
            registry.add_global_actor(factory(self.0), None)?;
            Ok(())
        }
    }

    fn initialized() -> ActorRegistry {
        let mut registry = ActorRegistry::new();
        registry.init();
        registry
    }

    #[test]
    fn requires_init() {
        let mut registry = ActorRegistry::new();
        assert!(!registry.is_initialized());
        assert!(matches!(
            registry.add_global_actor(factory("console"), None),
            Err(ServerError::NotInitialized)
        ));
        assert!(matches!(
            registry.add_module(&Module("profiler")),
            Err(ServerError::NotInitialized)
        ));
    }

    #[test]
    fn name_defaults_to_prefix() {
        let mut registry = initialized();
        assert_eq!(registry.add_tab_actor(factory("console"), None).unwrap(), "console");
        assert_eq!(
            registry.add_tab_actor(factory("console"), Some("webConsole")).unwrap(),
            "webConsole"
        );
        assert!(matches!(
            registry.add_tab_actor(Rc::new(Prefixless), None),
            Err(ServerError::UnnamedFactory)
        ));

        let names: Vec<_> = registry.tab_factories().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["console", "webConsole"]);
    }

    #[test]
    fn reserved_and_duplicate_names_are_rejected() {
        let mut registry = initialized();
        for reserved in ["from", "tabs", "selected"] {
            assert!(matches!(
                registry.add_global_actor(factory("x"), Some(reserved)),
                Err(ServerError::ReservedName(name)) if name == reserved
            ));
        }
        for reserved in ["title", "url", "actor"] {
            assert!(matches!(
                registry.add_tab_actor(factory("x"), Some(reserved)),
                Err(ServerError::ReservedName(_))
            ));
        }
        // reserved sets are per kind
        assert!(registry.add_tab_actor(factory("x"), Some("tabs")).is_ok());

        registry.add_global_actor(factory("profiler"), None).unwrap();
        assert!(matches!(
            registry.add_global_actor(factory("profiler"), None),
            Err(ServerError::DuplicateName(name)) if name == "profiler"
        ));
    }

    #[test]
    fn removal_matches_by_factory_name() {
        let mut registry = initialized();
        registry.add_global_actor(factory("profiler"), None).unwrap();
        registry.add_global_actor(factory("profiler"), Some("otherProfiler")).unwrap();
        registry.add_global_actor(factory("console"), None).unwrap();

        assert_eq!(registry.remove_global_actor(factory("profiler").as_ref()).unwrap(), 2);
        assert_eq!(registry.remove_global_actor(factory("profiler").as_ref()).unwrap(), 0);
        let names: Vec<_> = registry.global_factories().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["console"]);
    }

    #[test]
    fn modules_load_once() {
        let mut registry = initialized();
        assert!(registry.add_module(&Module("profiler")).unwrap());
        assert!(!registry.add_module(&Module("profiler")).unwrap());
        assert!(registry.is_loaded("profiler"));
        assert_eq!(registry.global_factories().count(), 1);

        registry.reset();
        assert!(!registry.is_initialized());
        assert!(!registry.is_loaded("profiler"));
    }
}
