//! Supervisor: owns credentials and bearer tokens, and answers every
//! authorization question.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{CredentialHasher, TokenSigner, generate_secret};
use crate::config::{ActivationMode, AuthConfig};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{
    ActivationToken, Credential, OMNIPOTENCE, Permission, SELF_CATEGORY, SYSTEM_CATEGORY, Scope,
    StoredToken, Subject, User, base_category, grant_category, requires_scope,
};

const ACTIVATION_TTL_DAYS: i64 = 7;

/// Builds a fresh password credential valid for `ttl_days`.
pub fn password_credential(
    hasher: &CredentialHasher,
    user_id: Uuid,
    password: &str,
    ttl_days: u32,
) -> Result<Credential> {
    if password.is_empty() {
        return Err(Error::validation("password must not be empty"));
    }
    let now = Utc::now();
    Ok(Credential {
        user_id,
        password_hash: hasher.hash(password)?,
        valid_from: now,
        expires_at: now + Duration::days(i64::from(ttl_days)),
    })
}

pub struct Supervisor {
    store: Arc<dyn Store>,
    hasher: CredentialHasher,
    signer: TokenSigner,
    credential_ttl_days: u32,
    activation: ActivationMode,
    tokens: HashMap<String, StoredToken>,
}

impl Supervisor {
    /// Loads the persisted tokens that are still valid.
    pub fn new(store: Arc<dyn Store>, config: &AuthConfig) -> Result<Self> {
        let ttl_secs = i64::try_from(config.token_ttl_secs)
            .map_err(|_| Error::Config("token_ttl_secs is too large".into()))?;

        let now = Utc::now();
        let purged = store.purge_expired_tokens(now)?;
        let tokens: HashMap<_, _> = store
            .list_tokens()?
            .into_iter()
            .map(|token| (token.tag.clone(), token))
            .collect();
        debug!(cached = tokens.len(), purged, "token cache loaded");

        Ok(Self {
            store,
            hasher: CredentialHasher::new()?,
            signer: TokenSigner::new(&config.token_key, &config.token_seed, Duration::seconds(ttl_secs)),
            credential_ttl_days: config.credential_ttl_days,
            activation: config.activation,
            tokens,
        })
    }

    fn usable_user(&self, uid: &str) -> Result<User> {
        match self.store.get_user_by_uid(uid)? {
            Some(user) if user.is_active && !user.is_deleted => Ok(user),
            _ => Err(Error::unauthorized("invalid credentials")),
        }
    }

    fn issue(&mut self, user_id: Uuid) -> Result<StoredToken> {
        let token = self.signer.issue(user_id, Utc::now())?;
        self.store.create_token(&token)?;
        self.tokens.insert(token.tag.clone(), token.clone());
        Ok(token)
    }

    /// Password login. Returns a freshly issued token.
    pub fn authenticate(&mut self, uid: &str, password: &str) -> Result<StoredToken> {
        let user = self.usable_user(uid)?;
        let now = Utc::now();
        let credential = self
            .store
            .get_credential(user.id)?
            .filter(|c| c.valid_from <= now && now < c.expires_at)
            .ok_or_else(|| Error::unauthorized("invalid credentials"))?;

        if !self.hasher.verify(password, &credential.password_hash)? {
            warn!(uid, "failed login");
            return Err(Error::unauthorized("invalid credentials"));
        }

        let token = self.issue(user.id)?;
        info!(uid, expires_at = %token.expires_at, "token issued");
        Ok(token)
    }

    /// Resolves a presented bearer tag to its subject.
    pub fn validate(&mut self, tag: &str) -> Result<Subject> {
        self.validate_at(tag, Utc::now())
    }

    fn validate_at(&mut self, tag: &str, now: DateTime<Utc>) -> Result<Subject> {
        let token = match self.tokens.get(tag) {
            Some(token) => token.clone(),
            None => self
                .store
                .get_token(tag)?
                .ok_or_else(|| Error::unauthorized("unknown token"))?,
        };

        if !token.is_valid_at(now) {
            self.tokens.remove(tag);
            self.store.delete_token(tag)?;
            return Err(Error::unauthorized("token expired"));
        }
        if !self.signer.verify(&token)? {
            return Err(Error::unauthorized("invalid token"));
        }

        let user = self
            .store
            .get_user(token.user_id)?
            .filter(|u| u.is_active && !u.is_deleted)
            .ok_or_else(|| Error::unauthorized("account is not active"))?;

        self.tokens.entry(token.tag.clone()).or_insert(token);
        Ok(Subject {
            user_id: user.id,
            uid: user.uid,
            team_id: user.team_id,
            is_admin: user.is_admin,
        })
    }

    /// Invalidates the presented token, or every token of its owner.
    pub fn logout(&mut self, subject: &Subject, tag: &str, all: bool) -> Result<usize> {
        if all {
            self.tokens.retain(|_, t| t.user_id != subject.user_id);
            let removed = self.store.delete_user_tokens(subject.user_id)?;
            info!(uid = %subject.uid, removed, "all tokens revoked");
            return Ok(removed);
        }
        self.tokens.remove(tag);
        Ok(usize::from(self.store.delete_token(tag)?))
    }

    pub fn change_password(&mut self, subject: &Subject, password: &str) -> Result<()> {
        let credential = password_credential(
            &self.hasher,
            subject.user_id,
            password,
            self.credential_ttl_days,
        )?;
        self.store.set_credential(&credential)?;
        info!(uid = %subject.uid, "password changed");
        Ok(())
    }

    fn require_mail_activation(&self) -> Result<()> {
        match self.activation {
            ActivationMode::MailToken => Ok(()),
            ActivationMode::Ldap => Err(Error::validation(
                "accounts are activated through the directory",
            )),
        }
    }

    /// Issues a one-time activation token for an account. Returns the
    /// plaintext, which is never stored.
    pub fn issue_activation(&mut self, user_id: Uuid) -> Result<String> {
        self.require_mail_activation()?;
        let user = self
            .store
            .get_user(user_id)?
            .filter(|u| !u.is_deleted)
            .ok_or_else(|| Error::not_found(format!("user {user_id}")))?;

        let secret = generate_secret();
        self.store.set_activation(&ActivationToken {
            user_id: user.id,
            token_hash: self.hasher.hash(&secret)?,
            expires_at: Utc::now() + Duration::days(ACTIVATION_TTL_DAYS),
        })?;
        info!(uid = %user.uid, "activation token issued");
        Ok(secret)
    }

    /// Sets the initial password of an account and logs it in.
    pub fn activate(&mut self, uid: &str, password: &str, token: &str) -> Result<StoredToken> {
        self.require_mail_activation()?;
        let mut user = self
            .store
            .get_user_by_uid(uid)?
            .filter(|u| !u.is_deleted)
            .ok_or_else(|| Error::unauthorized("invalid activation"))?;

        let activation = self
            .store
            .get_activation(user.id)?
            .filter(|a| Utc::now() < a.expires_at)
            .ok_or_else(|| Error::unauthorized("invalid activation"))?;
        if !self.hasher.verify(token, &activation.token_hash)? {
            return Err(Error::unauthorized("invalid activation"));
        }

        let credential =
            password_credential(&self.hasher, user.id, password, self.credential_ttl_days)?;
        self.store.set_credential(&credential)?;
        user.is_active = true;
        self.store.update_user(&user)?;
        self.store.delete_activation(user.id)?;
        info!(uid, "account activated");

        self.issue(user.id)
    }

    fn permission(&self, id: Uuid) -> Result<Option<Permission>> {
        self.store.get_permission(id)
    }

    /// Allows the request iff one of the subject's grants covers
    /// `(section, action)` within `scope`.
    pub fn authorize(
        &self,
        subject: &Subject,
        section: &str,
        action: &str,
        scope: &Scope,
    ) -> Result<()> {
        let category = self
            .store
            .get_section_by_name(section)?
            .map(|s| s.category)
            .ok_or_else(|| Error::forbidden(format!("unknown section {section}")))?;
        if category == SELF_CATEGORY {
            return Ok(());
        }

        let grants =
            self.store
                .list_grants_for(subject.user_id, subject.team_id, subject.is_admin)?;
        for grant in &grants {
            let Some(permission) = self.permission(grant.permission_id)? else {
                continue;
            };
            if grant.category == SYSTEM_CATEGORY
                && (permission.name == OMNIPOTENCE || permission.name == category)
            {
                return Ok(());
            }
            if grant.category != category {
                continue;
            }
            if requires_scope(&category) && !grant.matches_scope(scope) {
                continue;
            }
            let maps = self.store.list_permission_maps(permission.id)?;
            if maps.iter().any(|m| m.covers(section, action)) {
                return Ok(());
            }
        }

        debug!(uid = %subject.uid, section, action, "request denied");
        Err(Error::forbidden(format!("{section}:{action}")))
    }

    /// Allows granting or revoking `permission` within `scope`.
    pub fn authorize_grant(
        &self,
        subject: &Subject,
        permission: &Permission,
        scope: &Scope,
    ) -> Result<()> {
        let category = base_category(&permission.category);
        let granting = grant_category(category);

        let grants =
            self.store
                .list_grants_for(subject.user_id, subject.team_id, subject.is_admin)?;
        for grant in &grants {
            if grant.category == SYSTEM_CATEGORY {
                let Some(held) = self.permission(grant.permission_id)? else {
                    continue;
                };
                if held.name == OMNIPOTENCE || held.name == category {
                    return Ok(());
                }
                continue;
            }
            if grant.category == granting
                && (!requires_scope(&granting) || grant.matches_scope(scope))
            {
                return Ok(());
            }
        }

        Err(Error::forbidden(format!(
            "granting {} requires {granting}",
            permission.name
        )))
    }
}

enum Command {
    Authenticate {
        uid: String,
        password: String,
        reply: oneshot::Sender<Result<StoredToken>>,
    },
    Validate {
        tag: String,
        reply: oneshot::Sender<Result<Subject>>,
    },
    Logout {
        subject: Subject,
        tag: String,
        all: bool,
        reply: oneshot::Sender<Result<usize>>,
    },
    Password {
        subject: Subject,
        password: String,
        reply: oneshot::Sender<Result<()>>,
    },
    IssueActivation {
        user_id: Uuid,
        reply: oneshot::Sender<Result<String>>,
    },
    Activate {
        uid: String,
        password: String,
        token: String,
        reply: oneshot::Sender<Result<StoredToken>>,
    },
    Authorize {
        subject: Subject,
        section: String,
        action: String,
        scope: Scope,
        reply: oneshot::Sender<Result<()>>,
    },
    AuthorizeGrant {
        subject: Subject,
        permission: Permission,
        scope: Scope,
        reply: oneshot::Sender<Result<()>>,
    },
}

impl Command {
    fn reject(self) {
        match self {
            Command::Authenticate { reply, .. } | Command::Activate { reply, .. } => {
                let _ = reply.send(Err(Error::Shutdown));
            }
            Command::Validate { reply, .. } => {
                let _ = reply.send(Err(Error::Shutdown));
            }
            Command::Logout { reply, .. } => {
                let _ = reply.send(Err(Error::Shutdown));
            }
            Command::IssueActivation { reply, .. } => {
                let _ = reply.send(Err(Error::Shutdown));
            }
            Command::Password { reply, .. }
            | Command::Authorize { reply, .. }
            | Command::AuthorizeGrant { reply, .. } => {
                let _ = reply.send(Err(Error::Shutdown));
            }
        }
    }
}

impl Supervisor {
    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Authenticate {
                uid,
                password,
                reply,
            } => {
                let _ = reply.send(self.authenticate(&uid, &password));
            }
            Command::Validate { tag, reply } => {
                let _ = reply.send(self.validate(&tag));
            }
            Command::Logout {
                subject,
                tag,
                all,
                reply,
            } => {
                let _ = reply.send(self.logout(&subject, &tag, all));
            }
            Command::Password {
                subject,
                password,
                reply,
            } => {
                let _ = reply.send(self.change_password(&subject, &password));
            }
            Command::IssueActivation { user_id, reply } => {
                let _ = reply.send(self.issue_activation(user_id));
            }
            Command::Activate {
                uid,
                password,
                token,
                reply,
            } => {
                let _ = reply.send(self.activate(&uid, &password, &token));
            }
            Command::Authorize {
                subject,
                section,
                action,
                scope,
                reply,
            } => {
                let _ = reply.send(self.authorize(&subject, &section, &action, &scope));
            }
            Command::AuthorizeGrant {
                subject,
                permission,
                scope,
                reply,
            } => {
                let _ = reply.send(self.authorize_grant(&subject, &permission, &scope));
            }
        }
    }
}

/// Starts the supervisor task.
pub fn spawn(
    mut supervisor: Supervisor,
    queue_depth: usize,
    mut shutdown: watch::Receiver<bool>,
) -> (SupervisorHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(queue_depth);
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                command = rx.recv() => match command {
                    Some(command) => supervisor.dispatch(command),
                    None => break,
                },
            }
        }
        rx.close();
        while let Ok(command) = rx.try_recv() {
            command.reject();
        }
        info!("supervisor stopped");
    });
    (SupervisorHandle { tx }, task)
}

#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    pub async fn authenticate(&self, uid: &str, password: &str) -> Result<StoredToken> {
        self.call(|reply| Command::Authenticate {
            uid: uid.to_string(),
            password: password.to_string(),
            reply,
        })
        .await
    }

    pub async fn validate(&self, tag: &str) -> Result<Subject> {
        self.call(|reply| Command::Validate {
            tag: tag.to_string(),
            reply,
        })
        .await
    }

    pub async fn logout(&self, subject: &Subject, tag: &str, all: bool) -> Result<usize> {
        self.call(|reply| Command::Logout {
            subject: subject.clone(),
            tag: tag.to_string(),
            all,
            reply,
        })
        .await
    }

    pub async fn change_password(&self, subject: &Subject, password: &str) -> Result<()> {
        self.call(|reply| Command::Password {
            subject: subject.clone(),
            password: password.to_string(),
            reply,
        })
        .await
    }

    pub async fn issue_activation(&self, user_id: Uuid) -> Result<String> {
        self.call(|reply| Command::IssueActivation { user_id, reply })
            .await
    }

    pub async fn activate(&self, uid: &str, password: &str, token: &str) -> Result<StoredToken> {
        self.call(|reply| Command::Activate {
            uid: uid.to_string(),
            password: password.to_string(),
            token: token.to_string(),
            reply,
        })
        .await
    }

    pub async fn authorize(
        &self,
        subject: &Subject,
        section: &str,
        action: &str,
        scope: Scope,
    ) -> Result<()> {
        self.call(|reply| Command::Authorize {
            subject: subject.clone(),
            section: section.to_string(),
            action: action.to_string(),
            scope,
            reply,
        })
        .await
    }

    pub async fn authorize_grant(
        &self,
        subject: &Subject,
        permission: &Permission,
        scope: Scope,
    ) -> Result<()> {
        self.call(|reply| Command::AuthorizeGrant {
            subject: subject.clone(),
            permission: permission.clone(),
            scope,
            reply,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{create_test_store, seed_repository, seed_team, seed_user};
    use crate::store::{AuthStore, InventoryStore, PermissionStore, bootstrap};
    use crate::types::{Grant, PermissionMap, RecipientType};

    fn auth_config(ttl_secs: u64, activation: ActivationMode) -> AuthConfig {
        AuthConfig {
            token_seed: "seed".into(),
            token_key: "key".into(),
            token_ttl_secs: ttl_secs,
            credential_ttl_days: 1,
            activation,
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        store: Arc<crate::store::SqliteStore>,
        supervisor: Supervisor,
    }

    fn fixture(ttl_secs: u64, activation: ActivationMode) -> Fixture {
        let (temp, store) = create_test_store();
        let store = Arc::new(store);
        let hasher = CredentialHasher::new().unwrap();
        bootstrap(store.as_ref(), |id| {
            password_credential(&hasher, id, "rootpw", 1)
        })
        .unwrap();
        let supervisor = Supervisor::new(store.clone(), &auth_config(ttl_secs, activation)).unwrap();
        Fixture {
            _temp: temp,
            store,
            supervisor,
        }
    }

    fn subject_of(user: &User) -> Subject {
        Subject {
            user_id: user.id,
            uid: user.uid.clone(),
            team_id: user.team_id,
            is_admin: user.is_admin,
        }
    }

    fn with_password(f: &Fixture, user: &User, password: &str) {
        let hasher = CredentialHasher::new().unwrap();
        f.store
            .set_credential(&password_credential(&hasher, user.id, password, 1).unwrap())
            .unwrap();
    }

    #[test]
    fn test_login_and_validate() {
        let mut f = fixture(60, ActivationMode::MailToken);

        let token = f.supervisor.authenticate("root", "rootpw").unwrap();
        let subject = f.supervisor.validate(&token.tag).unwrap();
        assert_eq!(subject.uid, "root");
        assert!(subject.is_admin);

        assert!(matches!(
            f.supervisor.authenticate("root", "wrong"),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            f.supervisor.authenticate("nobody", "rootpw"),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            f.supervisor.validate("deadbeef"),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected_and_dropped() {
        let mut f = fixture(1, ActivationMode::MailToken);
        let token = f.supervisor.authenticate("root", "rootpw").unwrap();

        let later = token.valid_from + Duration::seconds(2);
        assert!(matches!(
            f.supervisor.validate_at(&token.tag, later),
            Err(Error::Unauthorized(_))
        ));
        assert!(f.store.get_token(&token.tag).unwrap().is_none());
    }

    #[test]
    fn test_tokens_survive_restart() {
        let mut f = fixture(60, ActivationMode::MailToken);
        let token = f.supervisor.authenticate("root", "rootpw").unwrap();

        let mut restarted =
            Supervisor::new(f.store.clone(), &auth_config(60, ActivationMode::MailToken)).unwrap();
        assert_eq!(restarted.validate(&token.tag).unwrap().uid, "root");
    }

    #[test]
    fn test_logout_one_and_all() {
        let mut f = fixture(60, ActivationMode::MailToken);
        let first = f.supervisor.authenticate("root", "rootpw").unwrap();
        let second = f.supervisor.authenticate("root", "rootpw").unwrap();
        let third = f.supervisor.authenticate("root", "rootpw").unwrap();
        let subject = f.supervisor.validate(&first.tag).unwrap();

        assert_eq!(f.supervisor.logout(&subject, &first.tag, false).unwrap(), 1);
        assert!(f.supervisor.validate(&first.tag).is_err());
        assert!(f.supervisor.validate(&second.tag).is_ok());

        assert_eq!(f.supervisor.logout(&subject, &second.tag, true).unwrap(), 2);
        assert!(f.supervisor.validate(&third.tag).is_err());
    }

    #[test]
    fn test_password_change() {
        let mut f = fixture(60, ActivationMode::MailToken);
        let team = seed_team(&f.store, "ops");
        let user = seed_user(&f.store, &team, "alice");
        with_password(&f, &user, "old");

        f.supervisor
            .change_password(&subject_of(&user), "new")
            .unwrap();
        assert!(f.supervisor.authenticate("alice", "old").is_err());
        assert!(f.supervisor.authenticate("alice", "new").is_ok());
        assert!(matches!(
            f.supervisor.change_password(&subject_of(&user), ""),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_mail_activation() {
        let mut f = fixture(60, ActivationMode::MailToken);
        let team = seed_team(&f.store, "ops");
        let mut user = seed_user(&f.store, &team, "bob");
        user.is_active = false;
        f.store.update_user(&user).unwrap();

        let secret = f.supervisor.issue_activation(user.id).unwrap();
        assert!(matches!(
            f.supervisor.activate("bob", "pw", "not-the-token"),
            Err(Error::Unauthorized(_))
        ));

        let token = f.supervisor.activate("bob", "pw", &secret).unwrap();
        assert_eq!(f.supervisor.validate(&token.tag).unwrap().uid, "bob");
        assert!(f.store.get_user(user.id).unwrap().unwrap().is_active);
        assert!(f.supervisor.activate("bob", "pw", &secret).is_err());
        assert!(f.supervisor.authenticate("bob", "pw").is_ok());
    }

    #[test]
    fn test_ldap_activation_is_refused() {
        let mut f = fixture(60, ActivationMode::Ldap);
        let team = seed_team(&f.store, "ops");
        let user = seed_user(&f.store, &team, "carol");
        assert!(matches!(
            f.supervisor.issue_activation(user.id),
            Err(Error::Validation(_))
        ));
    }

    fn repository_permission(f: &Fixture, section: &str) -> Permission {
        let permission = Permission {
            id: Uuid::new_v4(),
            name: format!("{section}-admin"),
            category: "repository".into(),
        };
        f.store.create_permission(&permission).unwrap();
        let section = f.store.get_section_by_name(section).unwrap().unwrap();
        f.store
            .create_permission_map(&PermissionMap {
                id: Uuid::new_v4(),
                permission_id: permission.id,
                category: permission.category.clone(),
                section_id: section.id,
                section_name: section.name,
                action_id: None,
                action_name: None,
            })
            .unwrap();
        permission
    }

    fn grant(f: &Fixture, user: &User, permission: &Permission, category: &str, scope: Option<Uuid>) {
        f.store
            .create_grant(&Grant {
                id: Uuid::new_v4(),
                recipient_type: RecipientType::User,
                recipient_id: user.id,
                permission_id: permission.id,
                category: category.into(),
                object_type: scope.map(|_| "repository".to_string()),
                object_id: scope,
                created_at: Utc::now(),
                created_by: None,
            })
            .unwrap();
    }

    #[test]
    fn test_authorize_scoped_grant() {
        let f = fixture(60, ActivationMode::MailToken);
        let team = seed_team(&f.store, "ops");
        let user = seed_user(&f.store, &team, "dave");
        let subject = subject_of(&user);
        let mine = seed_repository(&f.store, &team, "mine");
        let other = seed_repository(&f.store, &team, "other");
        let in_repo = |id| Scope::Repository {
            repository_id: id,
            bucket_id: None,
        };

        assert!(matches!(
            f.supervisor
                .authorize(&subject, "bucket", "add", &in_repo(mine.id)),
            Err(Error::Forbidden(_))
        ));
        assert!(f.supervisor.authorize(&subject, "job", "list", &Scope::Unscoped).is_ok());

        let permission = repository_permission(&f, "bucket");
        grant(&f, &user, &permission, "repository", Some(mine.id));

        assert!(f.supervisor.authorize(&subject, "bucket", "add", &in_repo(mine.id)).is_ok());
        assert!(f.supervisor.authorize(&subject, "bucket", "add", &in_repo(other.id)).is_err());
        assert!(f.supervisor.authorize(&subject, "group", "add", &in_repo(mine.id)).is_err());
    }

    #[test]
    fn test_omnipotence_allows_everything() {
        let mut f = fixture(60, ActivationMode::MailToken);
        let token = f.supervisor.authenticate("root", "rootpw").unwrap();
        let root = f.supervisor.validate(&token.tag).unwrap();

        assert!(f.supervisor.authorize(&root, "workflow", "set", &Scope::Unscoped).is_ok());
        let permission = repository_permission(&f, "bucket");
        assert!(f.supervisor.authorize_grant(&root, &permission, &Scope::Unscoped).is_ok());
    }

    #[test]
    fn test_granting_requires_grant_category() {
        let f = fixture(60, ActivationMode::MailToken);
        let team = seed_team(&f.store, "ops");
        let user = seed_user(&f.store, &team, "erin");
        let subject = subject_of(&user);
        let repo = seed_repository(&f.store, &team, "mine");
        let scope = Scope::Repository {
            repository_id: repo.id,
            bucket_id: None,
        };
        let permission = repository_permission(&f, "bucket");

        assert!(matches!(
            f.supervisor.authorize_grant(&subject, &permission, &scope),
            Err(Error::Forbidden(_))
        ));

        let delegate = Permission {
            id: Uuid::new_v4(),
            name: "delegate".into(),
            category: "repository:grant".into(),
        };
        f.store.create_permission(&delegate).unwrap();
        grant(&f, &user, &delegate, "repository:grant", Some(repo.id));

        assert!(f.supervisor.authorize_grant(&subject, &permission, &scope).is_ok());
        assert!(f.supervisor.authorize(&subject, "bucket", "add", &scope).is_err());
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let f = fixture(60, ActivationMode::MailToken);
        let (tx, rx) = watch::channel(false);
        let (handle, task) = spawn(f.supervisor, 4, rx);

        let token = handle.authenticate("root", "rootpw").await.unwrap();
        let subject = handle.validate(&token.tag).await.unwrap();
        handle
            .authorize(&subject, "bucket", "add", Scope::Unscoped)
            .await
            .unwrap();

        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(matches!(
            handle.validate(&token.tag).await,
            Err(Error::Shutdown)
        ));
    }
}
