use serde_json::Value;

use crate::data::{ReadOp, WriteOp};
use crate::error::{Error, Result};
use crate::instruction::Frame;
use crate::model::Model;
use crate::parameterized_string::ParameterizedString;
use crate::tree::NodeId;

/// A file path used as a value source or target.
#[derive(Debug)]
pub struct File {
    owner: NodeId,
    path: String,
    file: ParameterizedString,
}

impl File {
    pub fn new(owner: NodeId, path: String, file: String) -> Self {
        Self {
            owner,
            path,
            file: ParameterizedString::new(file),
        }
    }

    /// `length` gives the content length, `parse` the parsed JSON, anything else the text.
    pub async fn read(&self, model: &Model, frame: &Frame, operation: ReadOp) -> Result<Value> {
        let file = self.file.resolve(model, frame, self.owner, &self.path)?;
        let read = async {
            let content = tokio::fs::read_to_string(&file).await.map_err(|error| error.to_string())?;
            match operation {
                ReadOp::Length => Ok(Value::from(content.chars().count())),
                ReadOp::Parse => serde_json::from_str(&content).map_err(|error| error.to_string()),
                _ => Ok(Value::String(content)),
            }
        };
        read.await
            .map_err(|reason: String| Error::fatal_at(&self.path, format!("Failed to read file:\n{reason}")))
    }

    /// Appending operations append, the others overwrite.
    pub async fn write(&self, model: &Model, frame: &Frame, operation: WriteOp, value: &Value) -> Result<()> {
        let file = self.file.resolve(model, frame, self.owner, &self.path)?;
        let content = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let written = if operation.appends() {
            append(&file, &content).await
        } else {
            tokio::fs::write(&file, content).await
        };
        written.map_err(|error| Error::fatal_at(&self.path, format!("Failed to write file:\n{error}")))
    }
}

async fn append(file: &str, content: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut handle = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .await?;
    handle.write_all(content.as_bytes()).await?;
    handle.flush().await
}
