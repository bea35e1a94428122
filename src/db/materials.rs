use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use super::decimal_column;
use crate::error::{Error, Result};
use crate::models::Material;

const MATERIAL_COLUMNS: &str =
    "id, name, unit, unit_cost, waste_factor, allow_extreme_waste";

fn material_from_row(row: &Row<'_>) -> rusqlite::Result<Material> {
    Ok(Material {
        id: row.get(0)?,
        name: row.get(1)?,
        unit: row.get(2)?,
        unit_cost: decimal_column(row, 3)?,
        waste_factor: decimal_column(row, 4)?,
        allow_extreme_waste: row.get(5)?,
    })
}

/// Look up one material by its key.
pub fn get_material(conn: &Connection, id: &str) -> Result<Material> {
    conn.query_row(
        &format!("SELECT {MATERIAL_COLUMNS} FROM materials WHERE id = ?1"),
        [id],
        material_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::MaterialNotFound(id.to_string()))
}

/// Every material in the order it was first inserted. Updates keep their
/// original position.
pub fn list_materials(conn: &Connection) -> Result<Vec<Material>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MATERIAL_COLUMNS} FROM materials ORDER BY seq"
    ))?;

    let materials = stmt
        .query_map([], material_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(materials)
}

/// Insert a material or update the existing row with the same id. Running it
/// twice with the same input leaves a single row.
pub fn upsert_material(conn: &Connection, material: &Material) -> Result<Material> {
    material.validate()?;

    conn.execute(
        "INSERT INTO materials (id, name, unit, unit_cost, waste_factor, allow_extreme_waste)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             unit = excluded.unit,
             unit_cost = excluded.unit_cost,
             waste_factor = excluded.waste_factor,
             allow_extreme_waste = excluded.allow_extreme_waste",
        params![
            material.id,
            material.name,
            material.unit,
            material.unit_cost.to_string(),
            material.waste_factor.to_string(),
            material.allow_extreme_waste,
        ],
    )?;

    info!(material = %material.id, "material saved");
    Ok(material.clone())
}

/// Remove a material that no calculation record refers to.
pub fn delete_material(conn: &Connection, id: &str) -> Result<()> {
    // Existence first so a missing id is reported as such, not as "in use".
    get_material(conn, id)?;

    let records = count_references(conn, id)?;
    if records > 0 {
        warn!(material = %id, records, "refusing to delete referenced material");
        return Err(Error::MaterialInUse {
            id: id.to_string(),
            records,
        });
    }

    conn.execute("DELETE FROM materials WHERE id = ?1", [id])?;
    info!(material = %id, "material deleted");
    Ok(())
}

fn count_references(conn: &Connection, id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM calculation_records WHERE material_id = ?1",
        [id],
        |row| row.get(0),
    )?)
}
