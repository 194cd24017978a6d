use std::fmt;

use crate::errors::{ClientError, SyncError};
use crate::sync::protocol::{
    CreateNewIssueRequest, CreateRequest, DeleteRequest, NewComment, UpdateRequest,
};

const MAX_ID_LEN: usize = 64;
const MAX_TITLE_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "{}: {}", field, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

impl From<ValidationError> for ClientError {
    fn from(err: ValidationError) -> Self {
        ClientError::Validation(err.to_string())
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn validate_id(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::field(field, "cannot be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::field(
            field,
            format!("too long (max {} chars)", MAX_ID_LEN),
        ));
    }
    if !value.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(ValidationError::field(
            field,
            "can only contain alphanumeric characters, hyphens, and underscores",
        ));
    }
    Ok(())
}

impl Validate for NewComment {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("params.id", &self.id)?;
        validate_id("params.issueId", &self.issue_id)?;
        validate_id("params.creator", &self.creator)?;
        if self.body.trim().is_empty() {
            return Err(ValidationError::field("params.body", "cannot be empty"));
        }
        Ok(())
    }
}

impl Validate for CreateRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("workspaceId", self.workspace_id())?;
        match self {
            CreateRequest::Comment { params, .. } => params.validate(),
        }
    }
}

impl Validate for UpdateRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("workspaceId", self.workspace_id())?;
        validate_id("params.id", self.key())
    }
}

impl Validate for DeleteRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("workspaceId", self.workspace_id())?;
        validate_id("key", self.key())
    }
}

impl Validate for CreateNewIssueRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("workspaceId", &self.workspace_id)?;
        validate_id("issue.id", &self.issue.id)?;

        let title = self.issue.title.trim();
        if title.is_empty() {
            return Err(ValidationError::field("issue.title", "cannot be empty"));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(ValidationError::field(
                "issue.title",
                format!("too long (max {} chars)", MAX_TITLE_LEN),
            ));
        }
        if title.chars().any(|c| c.is_control()) {
            return Err(ValidationError::field(
                "issue.title",
                "cannot contain control characters",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IssuePriority, IssueStatus};
    use crate::sync::protocol::{NewDescription, NewIssue};

    fn new_issue(title: &str) -> CreateNewIssueRequest {
        CreateNewIssueRequest {
            workspace_id: "W1".to_string(),
            issue: NewIssue {
                id: "I1".to_string(),
                title: title.to_string(),
                priority: IssuePriority::Low,
                status: IssueStatus::Todo,
            },
            description: NewDescription {
                body: String::new(),
            },
        }
    }

    #[test]
    fn test_new_issue_requires_title() {
        assert!(new_issue("Bug").validate().is_ok());
        let err = new_issue("   ").validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("issue.title"));
    }

    #[test]
    fn test_delete_rejects_blank_key() {
        let request = DeleteRequest::Issue {
            workspace_id: "W1".to_string(),
            key: "".to_string(),
        };
        let err: SyncError = request.validate().unwrap_err().into();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }

    #[test]
    fn test_ids_reject_separators() {
        assert!(validate_id("id", "abc/def").is_err());
        assert!(validate_id("id", "aZ09_-").is_ok());
    }
}
