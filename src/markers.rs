//! Map layer state: station markers built from the spatial distribution,
//! mutated in place by station id rather than rebuilt per change.

use tokio::sync::RwLock;

use crate::config::MapConfig;
use crate::models::SpatialPoint;

/// One station bubble on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct StationMarker {
    pub station_id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub passengers: i64,
    pub radius: f64,
    pub color: String,
}

/// Partial update for a marker already on the map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerPatch {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub passengers: Option<i64>,
    pub radius: Option<f64>,
    pub color: Option<String>,
}

/// Builds the marker layer from spatial points. Points already carry their
/// display hints, so this is a straight projection.
pub fn markers_from_spatial(points: &[SpatialPoint]) -> Vec<StationMarker> {
    points
        .iter()
        .map(|point| StationMarker {
            station_id: point.station_id,
            name: point.station_name.clone(),
            latitude: point.latitude,
            longitude: point.longitude,
            passengers: point.total_passengers,
            radius: point.radius,
            color: point.color.clone(),
        })
        .collect()
}

pub struct MarkerStore {
    center: [f64; 2],
    zoom: u8,
    markers: RwLock<Vec<StationMarker>>,
    selected: RwLock<Option<i64>>,
}

impl MarkerStore {
    pub fn new(map: &MapConfig) -> Self {
        Self {
            center: map.default_center,
            zoom: map.default_zoom,
            markers: RwLock::new(Vec::new()),
            selected: RwLock::new(None),
        }
    }

    /// Initial viewport, fixed at construction.
    pub fn center(&self) -> [f64; 2] {
        self.center
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub async fn markers(&self) -> Vec<StationMarker> {
        self.markers.read().await.clone()
    }

    pub async fn marker(&self, station_id: i64) -> Option<StationMarker> {
        self.markers
            .read()
            .await
            .iter()
            .find(|m| m.station_id == station_id)
            .cloned()
    }

    /// Replaces the whole layer. A selection pointing at a station that is
    /// no longer present is dropped.
    pub async fn set_markers(&self, markers: Vec<StationMarker>) {
        let mut selected = self.selected.write().await;
        if let Some(id) = *selected {
            if !markers.iter().any(|m| m.station_id == id) {
                *selected = None;
            }
        }
        tracing::debug!(count = markers.len(), "Replaced marker layer");
        *self.markers.write().await = markers;
    }

    /// Adds a marker, replacing any existing marker for the same station.
    pub async fn add_marker(&self, marker: StationMarker) {
        let mut markers = self.markers.write().await;
        markers.retain(|m| m.station_id != marker.station_id);
        markers.push(marker);
    }

    /// Mutates one marker in place. Returns false when the station has no
    /// marker on the map.
    pub async fn update_marker(&self, station_id: i64, patch: MarkerPatch) -> bool {
        let mut markers = self.markers.write().await;
        match markers.iter_mut().find(|m| m.station_id == station_id) {
            Some(marker) => {
                if let Some(latitude) = patch.latitude {
                    marker.latitude = latitude;
                }
                if let Some(longitude) = patch.longitude {
                    marker.longitude = longitude;
                }
                if let Some(passengers) = patch.passengers {
                    marker.passengers = passengers;
                }
                if let Some(radius) = patch.radius {
                    marker.radius = radius;
                }
                if let Some(color) = patch.color {
                    marker.color = color;
                }
                true
            }
            None => false,
        }
    }

    pub async fn remove_marker(&self, station_id: i64) -> bool {
        let mut selected = self.selected.write().await;
        if *selected == Some(station_id) {
            *selected = None;
        }
        let mut markers = self.markers.write().await;
        let before = markers.len();
        markers.retain(|m| m.station_id != station_id);
        markers.len() < before
    }

    pub async fn select_station(&self, station_id: Option<i64>) {
        *self.selected.write().await = station_id;
    }

    pub async fn selected_marker(&self) -> Option<StationMarker> {
        let selected = (*self.selected.read().await)?;
        self.marker(selected).await
    }

    /// Markers inside a south-west / north-east bounding box.
    pub async fn markers_within(
        &self,
        south: f64,
        west: f64,
        north: f64,
        east: f64,
    ) -> Vec<StationMarker> {
        self.markers
            .read()
            .await
            .iter()
            .filter(|m| {
                m.latitude >= south && m.latitude <= north && m.longitude >= west
                    && m.longitude <= east
            })
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.markers.write().await.clear();
        *self.selected.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(station_id: i64, name: &str, latitude: f64, longitude: f64) -> StationMarker {
        StationMarker {
            station_id,
            name: name.to_string(),
            latitude,
            longitude,
            passengers: 1000,
            radius: 10.0,
            color: "#52c41a".to_string(),
        }
    }

    fn store() -> MarkerStore {
        MarkerStore::new(&MapConfig::default())
    }

    #[tokio::test]
    async fn projection_from_spatial_points() {
        let points = vec![SpatialPoint {
            station_id: 1,
            station_name: "成都东".to_string(),
            station_telecode: "CDW".to_string(),
            latitude: 30.6329,
            longitude: 104.1432,
            total_passengers: 51_000,
            passengers_in: 26_000,
            passengers_out: 25_000,
            radius: 18.2,
            color: "#f5222d".to_string(),
        }];

        let markers = markers_from_spatial(&points);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].station_id, 1);
        assert_eq!(markers[0].name, "成都东");
        assert_eq!(markers[0].passengers, 51_000);
        assert_eq!(markers[0].radius, 18.2);
    }

    #[tokio::test]
    async fn viewport_comes_from_map_config() {
        let store = store();
        assert_eq!(store.center(), [30.6595, 104.0659]);
        assert_eq!(store.zoom(), 12);
    }

    #[tokio::test]
    async fn targeted_update_touches_only_one_marker() {
        let store = store();
        store.add_marker(marker(1, "成都东", 30.63, 104.14)).await;
        store.add_marker(marker(2, "重庆北", 29.61, 106.55)).await;

        let updated = store
            .update_marker(
                1,
                MarkerPatch {
                    passengers: Some(99_000),
                    color: Some("#f5222d".to_string()),
                    ..MarkerPatch::default()
                },
            )
            .await;
        assert!(updated);

        let first = store.marker(1).await.expect("marker 1");
        assert_eq!(first.passengers, 99_000);
        assert_eq!(first.color, "#f5222d");
        let second = store.marker(2).await.expect("marker 2");
        assert_eq!(second.passengers, 1000);

        assert!(!store.update_marker(404, MarkerPatch::default()).await);
    }

    #[tokio::test]
    async fn add_replaces_marker_for_the_same_station() {
        let store = store();
        store.add_marker(marker(1, "成都东", 30.63, 104.14)).await;
        store.add_marker(marker(1, "成都东", 30.64, 104.15)).await;

        let markers = store.markers().await;
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].latitude, 30.64);
    }

    #[tokio::test]
    async fn selection_follows_the_marker_lifecycle() {
        let store = store();
        store.add_marker(marker(1, "成都东", 30.63, 104.14)).await;
        store.select_station(Some(1)).await;
        assert_eq!(
            store.selected_marker().await.expect("selected").station_id,
            1
        );

        store.remove_marker(1).await;
        assert!(store.selected_marker().await.is_none());
    }

    #[tokio::test]
    async fn replacing_the_layer_drops_stale_selections() {
        let store = store();
        store.add_marker(marker(1, "成都东", 30.63, 104.14)).await;
        store.select_station(Some(1)).await;

        store
            .set_markers(vec![marker(2, "重庆北", 29.61, 106.55)])
            .await;
        assert!(store.selected_marker().await.is_none());

        store.select_station(Some(2)).await;
        store
            .set_markers(vec![marker(2, "重庆北", 29.61, 106.55), marker(3, "遂宁", 30.51, 105.57)])
            .await;
        assert_eq!(
            store.selected_marker().await.expect("kept").station_id,
            2
        );
    }

    #[tokio::test]
    async fn bounding_box_filters_by_coordinates() {
        let store = store();
        store.add_marker(marker(1, "成都东", 30.6329, 104.1432)).await;
        store.add_marker(marker(2, "重庆北", 29.6074, 106.5509)).await;
        store.add_marker(marker(5, "遂宁", 30.5085, 105.5733)).await;

        // A box around the Chengdu area.
        let chengdu = store.markers_within(30.0, 103.5, 31.0, 105.0).await;
        assert_eq!(chengdu.len(), 1);
        assert_eq!(chengdu[0].station_id, 1);

        let all = store.markers_within(29.0, 103.0, 32.0, 107.0).await;
        assert_eq!(all.len(), 3);
    }
}
