//! Tags repository

use super::{Record, Repository};
use crate::config::DEFAULT_TAG_COLOR;
use crate::database::{NewTag, Tag, TagPatch};
use crate::error::{AppError, Result};
use crate::remote::{Row, Table};

/// `#rgb` or `#rrggbb`
pub fn is_valid_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

impl Record for Tag {
    const TABLE: Table = Table::Tags;
    const ORDER_BY: &'static str = "created_at";

    type New = NewTag;
    type Patch = TagPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn new_row(fields: &NewTag) -> Result<Row> {
        let name = fields.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Tag name cannot be empty".to_string()));
        }

        let color = match fields.color.trim() {
            "" => DEFAULT_TAG_COLOR.to_string(),
            c if is_valid_color(c) => c.to_string(),
            c => return Err(AppError::Validation(format!("Invalid tag color: {}", c))),
        };

        super::to_row(&NewTag {
            name: name.to_string(),
            color,
        })
    }
}

pub type TagsRepository = Repository<Tag>;
