use std::collections::BTreeMap;

use serde_json::{Map, Value};
use transport::Packet;

use super::TabActor;
use crate::actor::{Actor, ActorId, Disconnect, DispatchError, Reply, RequestTypes, RootActor};
use crate::config::TabDescriptor;
use crate::connection::{ActorContext, DebuggerServerConnection, ROOT_ACTOR};
use crate::pool::{PoolEntry, PoolId};
use crate::registry::ActorRegistry;

/// Actors created for one listed tab.
#[derive(Debug)]
struct TabEntry {
    actor: ActorId,
    extras: BTreeMap<String, ActorId>,
}

/// Root actor of a browser debugging connection.
///
/// `listTabs` registers the global actor factories once per connection and
/// builds a fresh pool of tab actors on every call, carrying over the tab
/// actors that still exist and discarding the previous pool.
pub struct BrowserRootActor {
    tabs: Vec<TabDescriptor>,
    tab_pool: Option<PoolId>,
    tab_entries: Vec<TabEntry>,
    global_pool: Option<PoolId>,
    global_actors: BTreeMap<String, ActorId>,
    request_types: RequestTypes<Self>,
}

impl BrowserRootActor {
    pub fn new(tabs: Vec<TabDescriptor>) -> Self {
        Self {
            tabs,
            tab_pool: None,
            tab_entries: Vec::new(),
            global_pool: None,
            global_actors: BTreeMap::new(),
            request_types: RequestTypes::<Self>::new().on("listTabs", Self::on_list_tabs),
        }
    }

    fn on_list_tabs(&mut self, _packet: &Packet, ctx: &mut ActorContext<'_>) -> eyre::Result<Reply> {
        let registry = ctx.registry();
        let root_id = ctx.actor_id().to_owned();
        let conn = ctx.connection();

        let pool = conn.create_pool();
        let mut entries = Vec::with_capacity(self.tabs.len());
        let mut forms = Vec::with_capacity(self.tabs.len());
        let previous = std::mem::take(&mut self.tab_entries);
        let mut previous = previous.into_iter();

        for tab in &self.tabs {
            let reused = match previous.next() {
                Some(entry) => conn.reparent(&entry.actor, pool)?.then_some(entry),
                None => None,
            };
            let entry = match reused {
                Some(entry) => entry,
                None => TabEntry {
                    actor: conn.add_actor_to(pool, PoolEntry::live(TabActor::new(tab.clone())))?,
                    extras: BTreeMap::new(),
                },
            };
            let entry = register_tab_extras(conn, registry, pool, entry)?;
            forms.push(tab_form(tab, &entry));
            entries.push(entry);
        }

        if let Some(old) = self.tab_pool.replace(pool) {
            conn.remove_actor_pool(old, true)?;
        }
        conn.add_actor_pool(pool)?;
        self.tab_entries = entries;

        if self.global_pool.is_none() {
            self.register_globals(conn, registry, &root_id)?;
        }

        let mut reply = Packet::reply(ROOT_ACTOR)
            .with("selected", 0)
            .with("tabs", forms);
        for (name, id) in &self.global_actors {
            reply.insert(name.clone(), id.clone());
        }
        Ok(reply.into())
    }

    fn register_globals(
        &mut self,
        conn: &mut DebuggerServerConnection,
        registry: &ActorRegistry,
        root_id: &str,
    ) -> eyre::Result<()> {
        let pool = conn.create_pool();
        for (name, factory) in registry.global_factories() {
            let id = conn.add_actor_to(
                pool,
                PoolEntry::factory(factory.clone(), Some(root_id.to_owned())),
            )?;
            self.global_actors.insert(name.to_owned(), id);
        }
        conn.add_actor_pool(pool)?;
        self.global_pool = Some(pool);
        Ok(())
    }
}

/// Move a tab's per-tab actors into `pool`, creating those not yet
/// registered. Actors for factories no longer registered stay behind.
fn register_tab_extras(
    conn: &mut DebuggerServerConnection,
    registry: &ActorRegistry,
    pool: PoolId,
    mut entry: TabEntry,
) -> eyre::Result<TabEntry> {
    let mut extras = BTreeMap::new();
    for (name, factory) in registry.tab_factories() {
        let reused = match entry.extras.remove(name) {
            Some(id) => conn.reparent(&id, pool)?.then_some(id),
            None => None,
        };
        let id = match reused {
            Some(id) => id,
            None => conn.add_actor_to(
                pool,
                PoolEntry::factory(factory.clone(), Some(entry.actor.clone())),
            )?,
        };
        extras.insert(name.to_owned(), id);
    }
    entry.extras = extras;
    Ok(entry)
}

fn tab_form(tab: &TabDescriptor, entry: &TabEntry) -> Value {
    let mut form = Map::new();
    form.insert("actor".to_owned(), entry.actor.clone().into());
    form.insert("title".to_owned(), tab.title.clone().into());
    form.insert("url".to_owned(), tab.url.clone().into());
    for (name, id) in &entry.extras {
        form.insert(name.clone(), id.clone().into());
    }
    Value::Object(form)
}

impl Actor for BrowserRootActor {
    fn actor_prefix(&self) -> Option<&str> {
        Some(ROOT_ACTOR)
    }

    fn handle(&mut self, packet: &Packet, ctx: &mut ActorContext<'_>) -> Result<Reply, DispatchError> {
        let handler = self.request_types.handler_for(packet)?;
        Ok(handler(self, packet, ctx)?)
    }

    fn as_disconnect(&mut self) -> Option<&mut dyn Disconnect> {
        Some(self)
    }
}

impl Disconnect for BrowserRootActor {
    fn disconnect(&mut self) -> eyre::Result<()> {
        tracing::debug!(tabs = self.tab_entries.len(), "browser root actor disconnected");
        self.tab_pool = None;
        self.tab_entries.clear();
        self.global_pool = None;
        self.global_actors.clear();
        Ok(())
    }
}

impl RootActor for BrowserRootActor {
    fn say_hello(&self) -> Packet {
        Packet::reply(ROOT_ACTOR)
            .with("applicationType", "browser")
            .with("traits", Map::new())
    }
}
