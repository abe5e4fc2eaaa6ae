//! Kerberos through the system GSSAPI library

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext as _, ServerCtx};
use libgssapi::credential::{Cred, CredUsage};
use libgssapi::name::Name;
use libgssapi::oid::{OidSet, GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE, GSS_NT_KRB5_PRINCIPAL};
use parking_lot::{const_mutex, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::mechanism::{Credential, IdentitySource, Mechanism, Role, SecurityContext};

fn gss(err: libgssapi::error::Error) -> Error {
    Error::Mechanism(err.to_string())
}

fn usage(role: Role) -> CredUsage {
    match role {
        Role::Initiator => CredUsage::Initiate,
        Role::Acceptor => CredUsage::Accept,
    }
}

fn acquire_cred(principal: Option<&str>, role: Role) -> Result<Cred> {
    let name = principal
        .map(|p| Name::new(p.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL)))
        .transpose()
        .map_err(gss)?;
    let mut mechs = OidSet::new().map_err(gss)?;
    mechs.add(&GSS_MECH_KRB5).map_err(gss)?;
    Cred::acquire(name.as_ref(), None, usage(role), Some(&mechs)).map_err(gss)
}

/// Keytabs handed to the library, by variable
///
/// The library reads them from the environment, which is shared by the
/// whole process, so each may be set once and never changed.
static KEYTABS: Mutex<BTreeMap<&'static str, PathBuf>> = const_mutex(BTreeMap::new());

fn keytab_var(role: Role) -> &'static str {
    match role {
        Role::Initiator => "KRB5_CLIENT_KTNAME",
        Role::Acceptor => "KRB5_KTNAME",
    }
}

/// Point the library at `keytab` for `role`
///
/// Fails if a different keytab is already in use for that role.
fn use_keytab(role: Role, keytab: &Path) -> Result<()> {
    let var = keytab_var(role);
    let mut keytabs = KEYTABS.lock();
    match keytabs.get(var) {
        Some(current) if current == keytab => Ok(()),
        Some(current) => Err(Error::Unsupported(format!(
            "{var} is already {}, cannot switch to {}",
            current.display(),
            keytab.display()
        ))),
        None => {
            debug!(var, keytab = %keytab.display(), "using keytab");
            std::env::set_var(var, keytab);
            keytabs.insert(var, keytab.to_path_buf());
            Ok(())
        }
    }
}

/// Kerberos v5 via GSSAPI
///
/// A keytab source points the library at the key file through the
/// standard `KRB5_CLIENT_KTNAME`/`KRB5_KTNAME` variables, once per
/// process and role; passwords are not supported here and go through the
/// HTTP Basic exchange instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct Krb5Mechanism;

impl Mechanism for Krb5Mechanism {
    fn acquire(&self, role: Role, source: &IdentitySource) -> Result<Arc<dyn Credential>> {
        let principal = match source {
            IdentitySource::Ccache => None,
            IdentitySource::Keytab { principal, keytab } => {
                use_keytab(role, keytab)?;
                Some(principal.clone())
            }
            IdentitySource::Password { .. } => {
                return Err(Error::Unsupported(
                    "kerberos password login is not available".to_string(),
                ))
            }
        };

        let cred = acquire_cred(principal.as_deref(), role)?;
        Ok(Arc::new(Krb5Credential {
            cred,
            principal,
            role,
        }))
    }
}

struct Krb5Credential {
    cred: Cred,
    principal: Option<String>,
    role: Role,
}

impl Credential for Krb5Credential {
    fn principal(&self) -> String {
        match &self.principal {
            Some(principal) => principal.clone(),
            None => self
                .cred
                .name()
                .map(|name| name.to_string())
                .unwrap_or_default(),
        }
    }

    fn remaining_lifetime(&self) -> Result<Duration> {
        self.cred.lifetime().map_err(gss)
    }

    fn initiate(&self, target: &str) -> Result<Box<dyn SecurityContext>> {
        // Contexts take ownership of a credential handle
        let cred = acquire_cred(self.principal.as_deref(), self.role)?;
        let target = Name::new(target.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE)).map_err(gss)?;
        let ctx = ClientCtx::new(
            Some(cred),
            target,
            CtxFlags::GSS_C_MUTUAL_FLAG,
            Some(&GSS_MECH_KRB5),
        );
        Ok(Box::new(Krb5Initiator { ctx }))
    }

    fn accept(&self) -> Result<Box<dyn SecurityContext>> {
        let cred = acquire_cred(self.principal.as_deref(), self.role)?;
        Ok(Box::new(Krb5Acceptor {
            ctx: ServerCtx::new(Some(cred)),
        }))
    }
}

struct Krb5Initiator {
    ctx: ClientCtx,
}

impl SecurityContext for Krb5Initiator {
    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let reply = self.ctx.step(token, None).map_err(gss)?;
        Ok(reply.map(|buf| buf.to_vec()))
    }

    fn is_established(&self) -> bool {
        self.ctx.is_complete()
    }

    fn peer_name(&self) -> Option<String> {
        self.ctx.target_name().ok().map(|name| name.to_string())
    }
}

struct Krb5Acceptor {
    ctx: ServerCtx,
}

impl SecurityContext for Krb5Acceptor {
    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let token = token.ok_or_else(|| Error::mechanism("acceptor needs a client token"))?;
        let reply = self.ctx.step(token).map_err(gss)?;
        Ok(reply.map(|buf| buf.to_vec()))
    }

    fn is_established(&self) -> bool {
        self.ctx.is_complete()
    }

    fn peer_name(&self) -> Option<String> {
        self.ctx.source_name().ok().map(|name| name.to_string())
    }
}
