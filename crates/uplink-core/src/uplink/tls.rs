//! Lifecycle of the TLS client context shared by uplinks

use alloc::rc::Rc;
use alloc::vec::Vec;

use log::{debug, info};
use serde::{Deserialize, Serialize};

/// How TLS contexts are handed out to uplinks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsReusePolicy {
    /// One context, created on first use and reused by every uplink
    #[default]
    Shared,
    /// A fresh context for every uplink
    PerUplink,
}

/// Trust anchors used to verify the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustAnchors {
    /// Whatever the TLS stack ships with
    #[default]
    BuiltIn,
    /// DER or PEM encoded root certificate(s)
    Provided(Vec<u8>),
}

/// Client credential and trust context. Immutable once built.
#[derive(Debug, PartialEq, Eq)]
pub struct TlsContext {
    id: u32,
    trust: TrustAnchors,
}

impl TlsContext {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn trust(&self) -> &TrustAnchors {
        &self.trust
    }
}

/// Creates TLS contexts and decides when they are shared.
///
/// Every uplink holds an `Rc` to its context until it reaches `Done`, so a
/// context is only freed after the last connection using it has finished,
/// whatever the completion order.
pub struct TlsContextProvider {
    policy: TlsReusePolicy,
    trust: TrustAnchors,
    shared: Option<Rc<TlsContext>>,
    created: u32,
}

impl TlsContextProvider {
    pub fn new(policy: TlsReusePolicy, trust: TrustAnchors) -> Self {
        Self {
            policy,
            trust,
            shared: None,
            created: 0,
        }
    }

    pub fn policy(&self) -> TlsReusePolicy {
        self.policy
    }

    /// Context for the next uplink.
    pub fn acquire(&mut self) -> Rc<TlsContext> {
        match self.policy {
            TlsReusePolicy::Shared => {
                if let Some(ctx) = &self.shared {
                    return Rc::clone(ctx);
                }
                let ctx = self.create();
                self.shared = Some(Rc::clone(&ctx));
                ctx
            }
            TlsReusePolicy::PerUplink => self.create(),
        }
    }

    /// Drop the provider's shared context if no uplink still refers to it.
    ///
    /// Returns `true` when the context was released.
    pub fn release_unused(&mut self) -> bool {
        match &self.shared {
            Some(ctx) if Rc::strong_count(ctx) == 1 => {
                debug!("Releasing TLS context #{}", ctx.id);
                self.shared = None;
                true
            }
            _ => false,
        }
    }

    /// Number of contexts built so far.
    pub fn contexts_created(&self) -> u32 {
        self.created
    }

    /// Uplinks currently holding the shared context.
    pub fn active_references(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |ctx| Rc::strong_count(ctx) - 1)
    }

    fn create(&mut self) -> Rc<TlsContext> {
        self.created += 1;
        info!("Created TLS client context #{}", self.created);
        Rc::new(TlsContext {
            id: self.created,
            trust: self.trust.clone(),
        })
    }
}
