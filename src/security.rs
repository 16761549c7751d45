//! The live security configuration.
//!
//! Readers take the current snapshot without locking. An edit batch runs against the
//! latest persisted document, is validated by building a new dispatcher from the
//! result, is persisted under an optimistic version check, and only then replaces
//! the snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;

use crate::authn::PluginRegistry;
use crate::authz::context::{AuthorizationDecision, Principal, RequestContext};
use crate::authz::resolver::PermissionNameTable;
use crate::command::{capture_errors, parse_batch};
use crate::errors::WardenError;
use crate::multi::{AuthnResult, MultiSchemeDispatcher, Section};
use crate::store::SecurityConfStore;

/// A persisted document and the dispatcher built from it.
#[derive(Debug)]
pub struct Snapshot {
    pub version: u64,
    pub document: Value,
    pub dispatcher: MultiSchemeDispatcher,
}

/// Result of authenticating and authorizing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub decision: AuthorizationDecision,
    pub principal: Option<Principal>,
    /// `WWW-Authenticate` values to send with a 401
    pub challenges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Applied { version: u64 },
    Unchanged,
    /// Per-command error reports; nothing was persisted
    Rejected(Vec<Value>),
}

pub struct SecurityService {
    store: Arc<dyn SecurityConfStore>,
    registry: Arc<PluginRegistry>,
    names: Arc<PermissionNameTable>,
    current: ArcSwap<Snapshot>,
}

impl SecurityService {
    pub fn open(
        store: Arc<dyn SecurityConfStore>,
        registry: Arc<PluginRegistry>,
        names: Arc<PermissionNameTable>,
    ) -> Result<Self, WardenError> {
        let loaded = store.load()?;
        let dispatcher =
            MultiSchemeDispatcher::from_config(&loaded.document, registry.clone(), names.clone())?;

        tracing::info!(
            version = loaded.version,
            schemes = dispatcher.schemes().len(),
            multi = dispatcher.is_multi(),
            "Loaded security configuration"
        );

        Ok(Self {
            store,
            registry,
            names,
            current: ArcSwap::from_pointee(Snapshot {
                version: loaded.version,
                document: loaded.document,
                dispatcher,
            }),
        })
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Authenticate the request headers carried by `ctx`, then authorize it.
    pub fn check(&self, mut ctx: RequestContext) -> CheckOutcome {
        let snapshot = self.current.load();
        let dispatcher = &snapshot.dispatcher;

        match dispatcher.authenticate(&ctx.headers) {
            AuthnResult::Challenge(challenges) => {
                return CheckOutcome {
                    decision: AuthorizationDecision::NeedsCredentials,
                    principal: None,
                    challenges,
                }
            }
            AuthnResult::Authenticated(principal) => ctx.principal = Some(principal),
            AuthnResult::Anonymous => {}
        }

        let decision = dispatcher.authorize(&ctx);
        tracing::debug!(
            resource = %ctx.resource,
            principal = ctx.principal.as_ref().map(|p| p.name.as_str()),
            decision = decision.as_str(),
            "authorization decision"
        );

        let challenges = if decision == AuthorizationDecision::NeedsCredentials {
            dispatcher.challenges()
        } else {
            Vec::new()
        };
        CheckOutcome {
            decision,
            principal: ctx.principal,
            challenges,
        }
    }

    /// Apply an edit batch to one section.
    pub fn edit(&self, section: Section, body: &Value) -> Result<EditOutcome, WardenError> {
        let mut ops = parse_batch(body)?;

        let latest = self.store.load()?;
        let current = self.current.load_full();
        // the store may have been changed behind our back without a version bump
        let dispatcher = if latest.version == current.version && latest.document == current.document {
            current.dispatcher.clone()
        } else {
            MultiSchemeDispatcher::from_config(
                &latest.document,
                self.registry.clone(),
                self.names.clone(),
            )?
        };

        let candidate = match dispatcher.edit(section, &latest.document, &mut ops) {
            Ok(candidate) => candidate,
            Err(WardenError::SchemeRouting(_)) => {
                return Ok(EditOutcome::Rejected(capture_errors(&ops)))
            }
            Err(e) => return Err(e),
        };

        let errors = capture_errors(&ops);
        if !errors.is_empty() {
            tracing::warn!(
                section = section.key(),
                failed = errors.len(),
                "edit batch rejected"
            );
            return Ok(EditOutcome::Rejected(errors));
        }
        let Some(candidate) = candidate else {
            return Ok(EditOutcome::Unchanged);
        };

        let dispatcher =
            MultiSchemeDispatcher::from_config(&candidate, self.registry.clone(), self.names.clone())?;
        let version = self.store.persist(&candidate, latest.version)?;
        self.install(Snapshot {
            version,
            document: candidate,
            dispatcher,
        });

        tracing::info!(
            section = section.key(),
            commands = ops.len(),
            version,
            "Applied security edit"
        );
        Ok(EditOutcome::Applied { version })
    }

    /// Replace the live snapshot unless a newer version is already installed.
    /// Writers that persist out of order must never roll readers back.
    fn install(&self, next: Snapshot) {
        let next = Arc::new(next);
        let previous = self.current.rcu(|cur| {
            if cur.version < next.version {
                next.clone()
            } else {
                cur.clone()
            }
        });
        if previous.version >= next.version {
            tracing::debug!(
                stale = next.version,
                live = previous.version,
                "kept newer security snapshot"
            );
        }
    }
}
