use transport::Packet;

use crate::actor::{Actor, Disconnect, DispatchError, Reply, RequestTypes};
use crate::config::TabDescriptor;
use crate::connection::ActorContext;

/// A debuggable tab.
pub struct TabActor {
    tab: TabDescriptor,
    attached: bool,
    request_types: RequestTypes<Self>,
}

impl TabActor {
    pub fn new(tab: TabDescriptor) -> Self {
        Self {
            tab,
            attached: false,
            request_types: RequestTypes::<Self>::new()
                .on("attach", Self::on_attach)
                .on("detach", Self::on_detach),
        }
    }

    pub fn tab(&self) -> &TabDescriptor {
        &self.tab
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    fn on_attach(&mut self, _packet: &Packet, ctx: &mut ActorContext<'_>) -> eyre::Result<Reply> {
        if !self.attached {
            tracing::debug!(actor = ctx.actor_id(), url = %self.tab.url, "attached to tab");
            self.attached = true;
        }
        Ok(Packet::new().with("type", "tabAttached").into())
    }

    fn on_detach(&mut self, _packet: &Packet, ctx: &mut ActorContext<'_>) -> eyre::Result<Reply> {
        if !self.attached {
            return Ok(Packet::new().with("error", "wrongState").into());
        }
        tracing::debug!(actor = ctx.actor_id(), url = %self.tab.url, "detached from tab");
        self.attached = false;
        Ok(Packet::new().with("type", "detached").into())
    }
}

impl Actor for TabActor {
    fn actor_prefix(&self) -> Option<&str> {
        Some("tab")
    }

    fn handle(&mut self, packet: &Packet, ctx: &mut ActorContext<'_>) -> Result<Reply, DispatchError> {
        let handler = self.request_types.handler_for(packet)?;
        Ok(handler(self, packet, ctx)?)
    }

    fn as_disconnect(&mut self) -> Option<&mut dyn Disconnect> {
        Some(self)
    }
}

impl Disconnect for TabActor {
    fn disconnect(&mut self) -> eyre::Result<()> {
        if self.attached {
            tracing::debug!(url = %self.tab.url, "detaching from tab on disconnect");
            self.attached = false;
        }
        Ok(())
    }
}
