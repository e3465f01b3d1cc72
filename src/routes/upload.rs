use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use tracing::info;

use super::session::{Ctx, Session};
use crate::{
    error::{bad, AppErr, AppResult},
    protocol::{Payload, Reply},
    utils::filename,
};

pub async fn upload_file(
    ctx: &Ctx,
    session: &Session,
    name: String,
    size: Option<usize>,
    data: String,
) -> AppResult<Reply> {
    let room = session.current_room()?;
    filename::validate_file(&name, &ctx.config.allowed_extensions)?;

    let limit = ctx.config.max_upload_bytes;
    if let Some(declared) = size.filter(|s| *s > limit) {
        return Err(AppErr::TooLarge { size: declared, limit });
    }

    let content = BASE64.decode(data.as_bytes()).map_err(|e| bad(format!("Invalid file data: {e}")))?;
    if content.len() > limit {
        return Err(AppErr::TooLarge { size: content.len(), limit });
    }
    if size.is_some_and(|s| s != content.len()) {
        return Err(bad("File size mismatch"));
    }

    // 磁碟失敗就不登記；同名檔案在房間鎖內依序寫入
    let uploader = session.display_name();
    let spool = ctx.spool.as_ref();
    let file = name.as_str();
    let meta = ctx
        .registry
        .put_file_with(room, file, Bytes::from(content), &uploader, |content| async move {
            if let Some(spool) = spool {
                spool.write(room, file, &content).await?;
            }
            Ok::<_, AppErr>(())
        })
        .await?;
    info!(room, file = %meta.name, size = meta.size, uploader = %uploader, "file stored");

    Ok(Reply::ok("upload_file", Payload::Uploaded { filename: meta.name, size: meta.size })
        .with_message(format!("File {name} uploaded successfully")))
}

pub async fn download_file(ctx: &Ctx, session: &Session, name: String) -> AppResult<Reply> {
    let room = session.current_room()?;
    let rec = ctx.registry.get_file(room, &name).await?;

    Ok(Reply::ok(
        "download_file",
        Payload::Download {
            size:        rec.size(),
            data:        BASE64.encode(&rec.content),
            filename:    rec.name,
            uploaded_by: rec.uploaded_by,
            uploaded_at: rec.uploaded_at,
        },
    ))
}
