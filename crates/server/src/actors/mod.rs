//! Built-in browser actors: a root actor that lists tabs and a tab actor
//! clients can attach to.

mod root;
mod tab;

pub use root::BrowserRootActor;
pub use tab::TabActor;

use crate::actor::RootActor;
use crate::config::TabDescriptor;
use crate::connection::DebuggerServerConnection;
use crate::error::ServerError;
use crate::registry::{ActorModule, ActorRegistry};

/// Actor module installing [`BrowserRootActor`] as the root actor.
#[derive(Debug, Clone, Default)]
pub struct BrowserActors {
    tabs: Vec<TabDescriptor>,
}

impl BrowserActors {
    pub const NAME: &'static str = "browser";

    pub fn new(tabs: Vec<TabDescriptor>) -> Self {
        Self { tabs }
    }
}

impl ActorModule for BrowserActors {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn install(&self, registry: &mut ActorRegistry) -> Result<(), ServerError> {
        let tabs = self.tabs.clone();
        registry.set_root_actor(move |_conn: &DebuggerServerConnection| {
            Box::new(BrowserRootActor::new(tabs.clone())) as Box<dyn RootActor>
        });
        Ok(())
    }
}
