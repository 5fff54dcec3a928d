//! Keyboard shortcuts and mouse orbiting.

use winit::event::{ElementState, MouseButton, MouseScrollDelta};
use winit::keyboard::KeyCode;

/// Radians of orbit per pixel of mouse drag.
pub const ORBIT_SENSITIVITY: f32 = 0.005;
/// Distance multiplier per wheel line.
pub const ZOOM_STEP: f32 = 0.9;
/// Pixels of touchpad scroll that count as one wheel line.
const PIXELS_PER_LINE: f64 = 50.0;

/// What a key press asks the viewer to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    CycleWeather,
    ToggleEnvironment,
    NextVariant,
    NextMaterialOption,
    FocusNextPart,
    ResetView,
    ToggleShadows,
    ToggleAmbientOcclusion,
    ToggleReflections,
    Screenshot,
    Quit,
}

pub fn action_for(key: KeyCode) -> Option<Action> {
    let action = match key {
        KeyCode::KeyW => Action::CycleWeather,
        KeyCode::KeyE => Action::ToggleEnvironment,
        KeyCode::KeyV => Action::NextVariant,
        KeyCode::KeyM => Action::NextMaterialOption,
        KeyCode::KeyF => Action::FocusNextPart,
        KeyCode::KeyR => Action::ResetView,
        KeyCode::Digit1 => Action::ToggleShadows,
        KeyCode::Digit2 => Action::ToggleAmbientOcclusion,
        KeyCode::Digit3 => Action::ToggleReflections,
        KeyCode::F12 => Action::Screenshot,
        KeyCode::Escape => Action::Quit,
        _ => return None,
    };
    Some(action)
}

/// Left-button drag tracking.
#[derive(Debug, Default)]
pub struct OrbitDrag {
    dragging: bool,
    last: Option<(f64, f64)>,
}

impl OrbitDrag {
    pub fn on_button(&mut self, button: MouseButton, state: ElementState) {
        if button == MouseButton::Left {
            self.dragging = state == ElementState::Pressed;
        }
    }

    /// Yaw and pitch deltas for a cursor move, or `None` when not dragging.
    pub fn on_cursor_moved(&mut self, x: f64, y: f64) -> Option<(f32, f32)> {
        let previous = self.last.replace((x, y));
        if !self.dragging {
            return None;
        }
        let (px, py) = previous?;
        let dx = (x - px) as f32;
        let dy = (y - py) as f32;
        // Dragging right spins the model right; dragging down looks from above.
        Some((-dx * ORBIT_SENSITIVITY, dy * ORBIT_SENSITIVITY))
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }
}

/// Camera distance factor for a wheel event. Scrolling up moves closer.
pub fn zoom_factor(delta: MouseScrollDelta) -> f32 {
    let lines = match delta {
        MouseScrollDelta::LineDelta(_, y) => y,
        MouseScrollDelta::PixelDelta(p) => (p.y / PIXELS_PER_LINE) as f32,
    };
    ZOOM_STEP.powf(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalPosition;

    #[test]
    fn test_shortcuts() {
        assert_eq!(action_for(KeyCode::KeyW), Some(Action::CycleWeather));
        assert_eq!(action_for(KeyCode::KeyE), Some(Action::ToggleEnvironment));
        assert_eq!(action_for(KeyCode::KeyV), Some(Action::NextVariant));
        assert_eq!(action_for(KeyCode::Escape), Some(Action::Quit));
        assert_eq!(action_for(KeyCode::KeyQ), None);
    }

    #[test]
    fn test_move_without_button_does_not_orbit() {
        let mut drag = OrbitDrag::default();
        assert_eq!(drag.on_cursor_moved(10.0, 10.0), None);
        assert_eq!(drag.on_cursor_moved(20.0, 10.0), None);
    }

    #[test]
    fn test_drag_produces_deltas() {
        let mut drag = OrbitDrag::default();
        drag.on_cursor_moved(100.0, 100.0);
        drag.on_button(MouseButton::Left, ElementState::Pressed);
        let (yaw, pitch) = drag.on_cursor_moved(110.0, 95.0).unwrap();
        assert!((yaw + 10.0 * ORBIT_SENSITIVITY).abs() < 1e-6);
        assert!((pitch + 5.0 * ORBIT_SENSITIVITY).abs() < 1e-6);

        drag.on_button(MouseButton::Left, ElementState::Released);
        assert!(!drag.is_dragging());
        assert_eq!(drag.on_cursor_moved(200.0, 200.0), None);
    }

    #[test]
    fn test_right_button_is_ignored() {
        let mut drag = OrbitDrag::default();
        drag.on_button(MouseButton::Right, ElementState::Pressed);
        assert!(!drag.is_dragging());
    }

    #[test]
    fn test_zoom_direction() {
        assert!(zoom_factor(MouseScrollDelta::LineDelta(0.0, 1.0)) < 1.0);
        assert!(zoom_factor(MouseScrollDelta::LineDelta(0.0, -1.0)) > 1.0);
        let pixels = zoom_factor(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, 50.0)));
        assert!((pixels - ZOOM_STEP).abs() < 1e-6);
    }
}
