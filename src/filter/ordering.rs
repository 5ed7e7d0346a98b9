use crate::config::ResolvedEntity;
use crate::error::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn to_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub direction: Direction,
}

/// Parse `?ordering=name,-release_date`. A leading `-` sorts descending.
/// Every field must be on the entity's ordering whitelist.
pub fn parse_ordering(entity: &ResolvedEntity, raw: &str) -> Result<Vec<OrderKey>, AppError> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (column, direction) = match trimmed.strip_prefix('-') {
            Some(c) => (c, Direction::Desc),
            None => (trimmed, Direction::Asc),
        };
        if !entity.ordering.iter().any(|allowed| allowed == column) {
            return Err(AppError::validation(
                "ordering",
                format!(
                    "cannot order by '{}'; allowed fields: {}",
                    column,
                    entity.ordering.join(", ")
                ),
            ));
        }
        out.push(OrderKey {
            column: column.to_string(),
            direction,
        });
    }
    Ok(out)
}
