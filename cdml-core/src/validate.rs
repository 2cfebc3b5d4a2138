//! Write-time checks.
//!
//! [`encode`](crate::encode) never fails, so anything it would have to drop
//! is rejected here before a document reaches disk.

use crate::encode::{is_xml_name, split_resource_key, RESERVED_CONSTRAINT_TAGS, RESERVED_DEPENDENCY_ATTRS};
use crate::error::EncodeError;
use crate::model::ComponentModel;

pub fn validate(model: &ComponentModel) -> Result<(), EncodeError> {
    if model.name.trim().is_empty() {
        return Err(EncodeError::EmptyName);
    }

    if let Some(constraints) = &model.constraints {
        for key in constraints.resources.iter().flat_map(|r| r.keys()) {
            let (element, _) = split_resource_key(key)
                .ok_or_else(|| EncodeError::MalformedResourceKey(key.clone()))?;
            if let Some(section) = RESERVED_CONSTRAINT_TAGS.iter().copied().find(|s| *s == element) {
                return Err(EncodeError::ReservedResourceTag {
                    key: key.clone(),
                    section,
                });
            }
        }

        for service in constraints.services.iter().flatten() {
            check_name(&service.name)?;
            for key in service.attributes.keys() {
                if key == "name" {
                    return Err(EncodeError::ReservedAttribute {
                        element: "service",
                        attribute: key.clone(),
                    });
                }
                check_name(key)?;
            }
        }
    }

    for dep in model.requires.iter().flatten() {
        for key in dep.config.iter().flat_map(|c| c.keys()) {
            if RESERVED_DEPENDENCY_ATTRS.contains(&key.as_str()) {
                return Err(EncodeError::ReservedAttribute {
                    element: "dependency",
                    attribute: key.clone(),
                });
            }
            check_name(key)?;
        }
    }

    Ok(())
}

fn check_name(name: &str) -> Result<(), EncodeError> {
    if is_xml_name(name) {
        Ok(())
    } else {
        Err(EncodeError::InvalidName(name.to_string()))
    }
}
