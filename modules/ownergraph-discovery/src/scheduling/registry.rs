use std::collections::HashSet;

use ownergraph_common::{Category, OwnerGraphError, Priority};

/// Built-in categories. TTLs are in hours.
pub const CATEGORIES: &[Category] = &[
    Category::new("ec2_instances", "ec2:instance", 6, Priority::Critical),
    Category::new("security_groups", "ec2:security-group", 12, Priority::Critical),
    Category::new("iam_roles", "iam:role", 24, Priority::High),
    Category::new("lambda_functions", "lambda:function", 12, Priority::High),
    Category::new("rds_instances", "rds:db", 24, Priority::High),
    Category::new("s3_buckets", "s3:bucket", 24, Priority::Medium),
    Category::new("ecs_services", "ecs:service", 12, Priority::Medium),
    Category::new("eks_clusters", "eks:cluster", 24, Priority::Medium),
    Category::new("dynamodb_tables", "dynamodb:table", 48, Priority::Medium),
    Category::new("sqs_queues", "sqs:queue", 48, Priority::Low),
    Category::new("sns_topics", "sns:topic", 48, Priority::Low),
    Category::new("cloudwatch_alarms", "cloudwatch:alarm", 72, Priority::Low),
];

/// The fixed set of categories known to this process.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    categories: Vec<Category>,
}

impl CategoryRegistry {
    pub fn new(categories: Vec<Category>) -> Result<Self, OwnerGraphError> {
        let mut seen = HashSet::new();
        for category in &categories {
            if !seen.insert(category.name) {
                return Err(OwnerGraphError::Config(format!(
                    "category '{}' registered twice",
                    category.name
                )));
            }
            if category.cache_ttl_hours <= 0 {
                return Err(OwnerGraphError::Config(format!(
                    "category '{}' needs a positive cache TTL",
                    category.name
                )));
            }
        }
        Ok(Self { categories })
    }

    pub fn standard() -> Self {
        Self {
            categories: CATEGORIES.to_vec(),
        }
    }

    pub fn all(&self) -> &[Category] {
        &self.categories
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Restrict the registry to the named categories, preserving registry order.
    pub fn subset(&self, names: &[String]) -> Result<Self, OwnerGraphError> {
        if let Some(unknown) = names.iter().find(|n| self.get(n).is_none()) {
            return Err(OwnerGraphError::UnknownCategory(unknown.clone()));
        }
        Ok(Self {
            categories: self
                .categories
                .iter()
                .filter(|c| names.iter().any(|n| n == c.name))
                .copied()
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
