use anyhow::Result;
use apikey::IdentityRef;

use super::Session;
use crate::Context;
use crate::ui;

/// Register a principal in the sandbox remote
pub fn add(ctx: &Context, id: &str) -> Result<()> {
    let id = id.trim();
    if id.is_empty() {
        anyhow::bail!("User id must not be empty");
    }

    let mut session = Session::open(ctx)?;
    session.remote.add_user(&IdentityRef::new(id));
    session.save()?;

    ui::success(&format!("Added user {id}"));
    Ok(())
}

pub fn list(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let snapshot = session.remote.snapshot();

    ui::header("Users");
    if snapshot.users.is_empty() {
        ui::dim("(none)");
        return Ok(());
    }
    for (user, keys) in &snapshot.users {
        ui::kv(user.as_str(), &format!("{} keys", keys.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use tempfile::TempDir;

    #[test]
    fn test_add_user_persists() {
        let dir = TempDir::new().unwrap();
        let ctx = testing::context(&dir);

        add(&ctx, "u1").unwrap();
        add(&ctx, "u1").unwrap();
        let session = Session::open(&ctx).unwrap();
        assert_eq!(session.remote.snapshot().users.len(), 1);

        assert!(add(&ctx, "  ").is_err());
    }
}
