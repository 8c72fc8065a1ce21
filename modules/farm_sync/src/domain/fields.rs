use crate::contract::{
    error::GatewayError,
    gateway::Entity,
    model::{Field, FieldDraft, FieldPatch, Ring},
};

/// Minimum number of positions in the outer ring of a polygon.
pub const MIN_OUTER_RING_POINTS: usize = 3;

impl Entity for Field {
    type Draft = FieldDraft;
    type Patch = FieldPatch;

    const KIND: &'static str = "field";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_updating(&mut self, updating: bool) {
        self.is_updating = updating;
    }

    fn validate_draft(draft: &FieldDraft) -> Result<(), GatewayError> {
        validate_area(draft.area)?;
        validate_polygon(&draft.coordinates)
    }

    fn validate_patch(patch: &FieldPatch) -> Result<(), GatewayError> {
        if let Some(area) = patch.area {
            validate_area(area)?;
        }
        if let Some(coordinates) = &patch.coordinates {
            validate_polygon(coordinates)?;
        }
        Ok(())
    }
}

fn validate_area(area: f64) -> Result<(), GatewayError> {
    if !area.is_finite() || area < 0.0 {
        return Err(GatewayError::validation(format!(
            "area must be a non-negative number of square meters, got {area}"
        )));
    }
    Ok(())
}

/// Polygon must have an outer ring of at least three finite positions.
pub fn validate_polygon(rings: &[Ring]) -> Result<(), GatewayError> {
    let Some(outer) = rings.first() else {
        return Err(GatewayError::validation("coordinates must contain an outer ring"));
    };
    if outer.len() < MIN_OUTER_RING_POINTS {
        return Err(GatewayError::validation(format!(
            "outer ring needs at least {MIN_OUTER_RING_POINTS} points, got {}",
            outer.len()
        )));
    }
    let bad = rings
        .iter()
        .flatten()
        .find(|[lng, lat]| !lng.is_finite() || !lat.is_finite());
    if let Some([lng, lat]) = bad {
        return Err(GatewayError::validation(format!(
            "coordinates must be finite, got [{lng}, {lat}]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::Category;

    fn square() -> Vec<Ring> {
        vec![vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.0, 0.0]]]
    }

    #[test]
    fn valid_draft_passes() {
        let draft = FieldDraft {
            label: "North".into(),
            color: "#22c55e".into(),
            area: 1.0,
            coordinates: square(),
            categories: vec![Category::new("Wheat")],
        };
        assert!(Field::validate_draft(&draft).is_ok());
    }

    #[test]
    fn empty_or_degenerate_polygons_are_rejected() {
        assert!(validate_polygon(&[]).is_err());
        assert!(validate_polygon(&[vec![[0.0, 0.0], [1.0, 1.0]]]).is_err());
        assert!(validate_polygon(&[vec![[0.0, 0.0], [f64::NAN, 1.0], [1.0, 1.0]]]).is_err());
    }

    #[test]
    fn negative_area_in_patch_is_rejected() {
        let patch = FieldPatch {
            area: Some(-3.0),
            ..Default::default()
        };
        let err = Field::validate_patch(&patch).unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));

        assert!(Field::validate_patch(&FieldPatch {
            label: Some("renamed".into()),
            ..Default::default()
        })
        .is_ok());
    }
}
