//! Area geometry encoders: WKT for ECQL, GML 2 for filter encoding, and Esri
//! JSON rings for the attribute store.

use serde_json::json;

use crate::entry::{Geometry, REFERENCE_SRID, Ring};

/// Ring with its first position repeated at the end when missing.
fn closed(ring: &Ring) -> Ring {
    let mut ring = ring.clone();
    match (ring.first().copied(), ring.last().copied()) {
        (Some(first), Some(last)) if first != last => ring.push(first),
        _ => {}
    }
    ring
}

fn wkt_ring(ring: &Ring) -> String {
    let positions: Vec<String> = closed(ring)
        .iter()
        .map(|[x, y]| format!("{x} {y}"))
        .collect();
    format!("({})", positions.join(", "))
}

fn wkt_polygon_body(rings: &[Ring]) -> String {
    let rings: Vec<String> = rings.iter().map(wkt_ring).collect();
    format!("({})", rings.join(", "))
}

/// Well-known text, axis order `x y` (longitude latitude).
pub fn to_wkt(geometry: &Geometry) -> String {
    match geometry {
        Geometry::Polygon(rings) => format!("POLYGON {}", wkt_polygon_body(rings)),
        Geometry::MultiPolygon(polygons) => {
            let bodies: Vec<String> = polygons.iter().map(|p| wkt_polygon_body(p)).collect();
            format!("MULTIPOLYGON ({})", bodies.join(", "))
        }
    }
}

fn gml_ring(ring: &Ring) -> String {
    let positions: Vec<String> = closed(ring)
        .iter()
        .map(|[x, y]| format!("{x},{y}"))
        .collect();
    format!(
        "<gml:LinearRing><gml:coordinates>{}</gml:coordinates></gml:LinearRing>",
        positions.join(" ")
    )
}

fn gml_polygon(rings: &[Ring], srs: Option<&str>) -> String {
    let mut out = match srs {
        Some(srs) => format!("<gml:Polygon srsName=\"{srs}\">"),
        None => "<gml:Polygon>".to_string(),
    };
    if let Some((exterior, holes)) = rings.split_first() {
        out.push_str("<gml:outerBoundaryIs>");
        out.push_str(&gml_ring(exterior));
        out.push_str("</gml:outerBoundaryIs>");
        for hole in holes {
            out.push_str("<gml:innerBoundaryIs>");
            out.push_str(&gml_ring(hole));
            out.push_str("</gml:innerBoundaryIs>");
        }
    }
    out.push_str("</gml:Polygon>");
    out
}

/// GML 2 geometry in the reference frame.
pub fn to_gml(geometry: &Geometry) -> String {
    let srs = format!("EPSG:{REFERENCE_SRID}");
    match geometry {
        Geometry::Polygon(rings) => gml_polygon(rings, Some(&srs)),
        Geometry::MultiPolygon(polygons) => {
            let mut out = format!("<gml:MultiPolygon srsName=\"{srs}\">");
            for polygon in polygons {
                out.push_str("<gml:polygonMember>");
                out.push_str(&gml_polygon(polygon, None));
                out.push_str("</gml:polygonMember>");
            }
            out.push_str("</gml:MultiPolygon>");
            out
        }
    }
}

/// Twice the signed area; positive for counter-clockwise rings.
fn signed_area(ring: &Ring) -> f64 {
    ring.iter()
        .zip(ring.iter().skip(1).chain(ring.first()))
        .map(|([x1, y1], [x2, y2])| x1 * y2 - x2 * y1)
        .sum()
}

/// Ring closed and turned to the requested winding.
fn oriented(ring: &Ring, clockwise: bool) -> Ring {
    let mut ring = closed(ring);
    if (signed_area(&ring) < 0.0) != clockwise {
        ring.reverse();
    }
    ring
}

/// One Esri JSON polygon holding every ring of every geometry.
///
/// Exterior rings are wound clockwise and holes counter-clockwise, as the
/// attribute store expects.
pub fn to_esri_polygon<'a>(geometries: impl IntoIterator<Item = &'a Geometry>) -> String {
    let mut rings: Vec<Ring> = Vec::new();
    for geometry in geometries {
        for polygon in geometry.polygons() {
            for (index, ring) in polygon.iter().enumerate() {
                rings.push(oriented(ring, index == 0));
            }
        }
    }
    json!({
        "rings": rings,
        "spatialReference": { "wkid": REFERENCE_SRID },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_square() -> Geometry {
        Geometry::Polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]])
    }

    #[test]
    fn wkt_closes_rings() {
        assert_eq!(
            to_wkt(&open_square()),
            "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))"
        );
    }

    #[test]
    fn wkt_multipolygon() {
        let ring = vec![[0.5, 0.5], [2.0, 0.5], [2.0, 2.0], [0.5, 0.5]];
        let multi = Geometry::MultiPolygon(vec![vec![ring.clone()], vec![ring]]);
        assert_eq!(
            to_wkt(&multi),
            "MULTIPOLYGON (((0.5 0.5, 2 0.5, 2 2, 0.5 0.5)), ((0.5 0.5, 2 0.5, 2 2, 0.5 0.5)))"
        );
    }

    #[test]
    fn gml_uses_reference_frame() {
        let gml = to_gml(&open_square());
        assert!(gml.starts_with("<gml:Polygon srsName=\"EPSG:4326\">"));
        assert!(gml.contains("<gml:coordinates>0,0 1,0 1,1 0,1 0,0</gml:coordinates>"));
    }

    #[test]
    fn esri_exterior_is_clockwise() {
        let value: serde_json::Value =
            serde_json::from_str(&to_esri_polygon([&open_square()])).unwrap_or_default();
        let first = &value["rings"][0];
        assert_eq!(first[1], json!([0.0, 1.0]));
        assert_eq!(value["spatialReference"]["wkid"], json!(4326));
    }
}
