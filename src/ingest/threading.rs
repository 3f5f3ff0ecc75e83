//! Reply threading: which existing patch does a reply belong to?

use crate::models::{Patch, Project};
use crate::parser::message::truncate_msgid;
use crate::store::{Datastore, StoreError};

/// Resolve the patch a reply belongs to from its candidate references.
///
/// `refs` is ordered most specific first (see
/// [`MailMessage::find_references`](crate::parser::MailMessage::find_references)).
/// Each reference is tried as a patch message-id and then as the message-id
/// of a stored comment, in which case the comment's patch is returned. Only
/// patches of `project` are considered.
pub async fn find_patch_for_comment<S: Datastore>(
    store: &S,
    project: &Project,
    refs: &[String],
) -> Result<Option<Patch>, StoreError> {
    for reference in refs {
        let msgid = truncate_msgid(reference);

        if let Some(patch) = store.find_patch_by_msgid(project.id, &msgid).await? {
            return Ok(Some(patch));
        }

        if let Some(patch) = store
            .find_patch_for_comment_msgid(project.id, &msgid)
            .await?
        {
            return Ok(Some(patch));
        }
    }

    Ok(None)
}
