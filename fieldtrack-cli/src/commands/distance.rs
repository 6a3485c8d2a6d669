//! Distance command - great-circle distance and bearing between two points.

use fieldtrack::tracking::{bearing_degrees, distance_meters, Coordinate};

use crate::error::CliError;

/// Run the distance command.
pub fn run(from: Coordinate, to: Coordinate) -> Result<(), CliError> {
    let meters = distance_meters(from, to);
    let bearing = bearing_degrees(from, to);

    println!("From:     {}", from);
    println!("To:       {}", to);
    println!("Distance: {}", format_distance(meters));
    println!("Bearing:  {:.1}° ({})", bearing, compass_point(bearing));

    Ok(())
}

/// Render meters as `"850 m"` or `"12.35 km"`.
fn format_distance(meters: f64) -> String {
    if meters < 1_000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.2} km", meters / 1_000.0)
    }
}

/// Nearest of the eight compass points for a bearing in degrees.
fn compass_point(bearing: f64) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let index = ((bearing.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
    POINTS[index]
}
