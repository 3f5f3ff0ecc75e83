//! Initial state and delegate for a new patch.
//!
//! Submitters (or list tooling) may request a state or delegate with the
//! `X-Patchwork-State` and `X-Patchwork-Delegate` headers. Without a
//! delegate header the project's delegation rules are consulted: each file
//! the diff touches is matched against the rules' glob patterns, highest
//! priority first, and the patch is delegated only if every file lands on
//! the same user.

use glob::Pattern;

use crate::models::{DelegationRule, Project, State, User};
use crate::parser::MailMessage;
use crate::store::{Datastore, StoreError};

/// The state named by `X-Patchwork-State`, else the default state.
pub async fn find_state<S: Datastore>(
    store: &S,
    mail: &MailMessage<'_>,
) -> Result<Option<State>, StoreError> {
    if let Some(Ok(name)) = mail.header("X-Patchwork-State") {
        if let Some(state) = store.find_state_by_name(&name).await? {
            return Ok(Some(state));
        }
        log::debug!("unknown state {:?} requested, using default", name);
    }

    store.default_state().await
}

/// The user named by `X-Patchwork-Delegate`, if any.
pub async fn find_delegate_by_header<S: Datastore>(
    store: &S,
    mail: &MailMessage<'_>,
) -> Result<Option<User>, StoreError> {
    let Some(Ok(email)) = mail.header("X-Patchwork-Delegate") else {
        return Ok(None);
    };

    let user = store.find_user_by_email(&email).await?;
    if user.is_none() {
        log::debug!("unknown delegate {:?} requested", email);
    }
    Ok(user)
}

/// The user every file maps to under the delegation rules, if there is one.
pub fn match_delegation_rules(rules: &[DelegationRule], filenames: &[String]) -> Option<i64> {
    let compiled: Vec<(Pattern, i64)> = rules
        .iter()
        .filter_map(|rule| match Pattern::new(&rule.path) {
            Ok(pattern) => Some((pattern, rule.user_id)),
            Err(err) => {
                log::warn!("ignoring delegation rule {:?}: {}", rule.path, err);
                None
            }
        })
        .collect();

    let mut delegate = None;
    for filename in filenames {
        let user_id = compiled
            .iter()
            .find(|(pattern, _)| pattern.matches(filename))
            .map(|(_, user_id)| *user_id)?;

        match delegate {
            None => delegate = Some(user_id),
            Some(existing) if existing != user_id => return None,
            Some(_) => {}
        }
    }

    delegate
}

/// The delegate for a new patch touching `filenames`.
pub async fn find_delegate<S: Datastore>(
    store: &S,
    project: &Project,
    mail: &MailMessage<'_>,
    filenames: &[String],
) -> Result<Option<i64>, StoreError> {
    if let Some(user) = find_delegate_by_header(store, mail).await? {
        return Ok(Some(user.id));
    }

    if filenames.is_empty() {
        return Ok(None);
    }

    let rules = store.delegation_rules(project.id).await?;
    Ok(match_delegation_rules(&rules, filenames))
}
