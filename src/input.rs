use smithay::{
    backend::input::{
        AbsolutePositionEvent, Axis, AxisSource, ButtonState, Event, InputBackend, InputEvent,
        KeyboardKeyEvent, PointerAxisEvent, PointerButtonEvent, PointerMotionEvent, TouchEvent,
    },
    desktop::layer_map_for_output,
    input::{
        keyboard::FilterResult,
        pointer::{AxisFrame, ButtonEvent, MotionEvent},
        touch::{DownEvent, MotionEvent as TouchMotionEvent, UpEvent},
    },
    reexports::wayland_server::protocol::wl_surface::WlSurface,
    utils::{Logical, Point, Rectangle, SERIAL_COUNTER, Serial},
    wayland::shell::wlr_layer::{KeyboardInteractivity, Layer as WlrLayer},
};

use crate::{Frame, policy::WindowManagementPolicy};

impl Frame {
    pub fn handle_input_event<B: InputBackend>(&mut self, event: InputEvent<B>) {
        match event {
            InputEvent::Keyboard { event } => self.handle_keyboard_event::<B>(event),
            InputEvent::PointerMotion { event } => self.handle_pointer_motion::<B>(event),
            InputEvent::PointerMotionAbsolute { event } => {
                self.handle_pointer_motion_absolute::<B>(event)
            }
            InputEvent::PointerButton { event } => self.handle_pointer_button::<B>(event),
            InputEvent::PointerAxis { event } => self.handle_pointer_axis::<B>(event),
            InputEvent::TouchDown { event } => self.handle_touch_down::<B>(event),
            InputEvent::TouchMotion { event } => self.handle_touch_motion::<B>(event),
            InputEvent::TouchUp { event } => self.handle_touch_up::<B>(event),
            InputEvent::TouchCancel { .. } => self.handle_touch_cancel(),
            InputEvent::TouchFrame { .. } => {
                if let Some(touch) = self.seat.get_touch() {
                    touch.frame(self);
                }
            }
            _ => {}
        }
    }

    fn handle_keyboard_event<B: InputBackend>(&mut self, event: B::KeyboardKeyEvent) {
        let serial = SERIAL_COUNTER.next_serial();
        let time_msec = Event::time_msec(&event);
        let Some(keyboard) = self.seat.get_keyboard() else {
            return;
        };

        if let Some(surface) = self.exclusive_layer_surface() {
            self.set_keyboard_focus(Some(surface), serial);
        }

        keyboard.input::<(), _>(
            self,
            event.key_code(),
            event.state(),
            serial,
            time_msec,
            |_, _, _| FilterResult::Forward,
        );
    }

    /// A top or overlay layer surface asking for exclusive keyboard input.
    fn exclusive_layer_surface(&self) -> Option<WlSurface> {
        self.shell.space.outputs().find_map(|output| {
            let layers = layer_map_for_output(output);
            [WlrLayer::Overlay, WlrLayer::Top]
                .into_iter()
                .find_map(|layer_kind| {
                    layers.layers_on(layer_kind).find_map(|layer| {
                        let is_exclusive = layer.cached_state().keyboard_interactivity
                            == KeyboardInteractivity::Exclusive;
                        if !is_exclusive || layers.layer_geometry(layer).is_none() {
                            return None;
                        }
                        Some(layer.wl_surface().clone())
                    })
                })
        })
    }

    fn handle_pointer_motion<B: InputBackend>(&mut self, event: B::PointerMotionEvent) {
        let delta = (event.delta_x(), event.delta_y()).into();
        let location = self.clamp_to_outputs(self.shell.pointer_location + delta);
        self.move_pointer(location, event.time_msec());
    }

    fn handle_pointer_motion_absolute<B: InputBackend>(
        &mut self,
        event: B::PointerMotionAbsoluteEvent,
    ) {
        let Some(output_geo) = self.primary_output_geometry() else {
            return;
        };
        let location = output_geo.loc.to_f64()
            + (
                event.x_transformed(output_geo.size.w),
                event.y_transformed(output_geo.size.h),
            )
                .into();
        self.move_pointer(location, event.time_msec());
    }

    fn move_pointer(&mut self, location: Point<f64, Logical>, time: u32) {
        self.shell.pointer_location = location;
        self.refresh_pointer_focus(SERIAL_COUNTER.next_serial(), time);
    }

    fn refresh_pointer_focus(&mut self, serial: Serial, time: u32) {
        let Some(pointer) = self.pointer() else {
            return;
        };
        let location = self.shell.pointer_location;
        let under = self.surface_under(location);
        pointer.motion(
            self,
            under,
            &MotionEvent {
                location,
                serial,
                time,
            },
        );
        pointer.frame(self);
    }

    fn handle_pointer_button<B: InputBackend>(&mut self, event: B::PointerButtonEvent) {
        let serial = SERIAL_COUNTER.next_serial();
        let Some(pointer) = self.pointer() else {
            return;
        };

        // Clicks may arrive without a preceding motion event.
        if !pointer.is_grabbed() {
            self.refresh_pointer_focus(serial, event.time_msec());
        }

        let button_state = event.state();
        if button_state == ButtonState::Pressed && !pointer.is_grabbed() {
            let cursor = self.shell.pointer_location;
            self.policy.handle_pointer_button(&mut self.shell, cursor);
            self.apply_focus_request();
        }

        pointer.button(
            self,
            &ButtonEvent {
                button: event.button_code(),
                state: button_state,
                serial,
                time: event.time_msec(),
            },
        );
        pointer.frame(self);
    }

    fn handle_pointer_axis<B: InputBackend>(&mut self, event: B::PointerAxisEvent) {
        let Some(pointer) = self.pointer() else {
            return;
        };

        let amount = |axis| {
            event
                .amount(axis)
                .unwrap_or_else(|| event.amount_v120(axis).unwrap_or(0.0) * 3.0 / 120.0)
        };

        let mut axis_frame = AxisFrame::new(event.time_msec()).source(event.source());
        for axis in [Axis::Horizontal, Axis::Vertical] {
            if amount(axis) != 0.0 {
                axis_frame = axis_frame.value(axis, amount(axis));
                if let Some(discrete) = event.amount_v120(axis) {
                    axis_frame = axis_frame.v120(axis, discrete as i32);
                }
            }
            if event.source() == AxisSource::Finger && event.amount(axis) == Some(0.0) {
                axis_frame = axis_frame.stop(axis);
            }
        }

        pointer.axis(self, axis_frame);
        pointer.frame(self);
    }

    fn touch_location<E: AbsolutePositionEvent<B>, B: InputBackend>(
        &self,
        event: &E,
    ) -> Option<Point<f64, Logical>> {
        let output_geo = self.primary_output_geometry()?;
        Some(
            output_geo.loc.to_f64()
                + (
                    event.x_transformed(output_geo.size.w),
                    event.y_transformed(output_geo.size.h),
                )
                    .into(),
        )
    }

    fn handle_touch_down<B: InputBackend>(&mut self, event: B::TouchDownEvent) {
        let Some(touch) = self.seat.get_touch() else {
            return;
        };
        let Some(location) = self.touch_location::<_, B>(&event) else {
            return;
        };
        let slot = event.slot();
        let serial = SERIAL_COUNTER.next_serial();

        self.touch_points.retain(|(existing, _)| *existing != slot);
        self.touch_points.push((slot, location));
        let points: Vec<_> = self.touch_points.iter().map(|(_, point)| *point).collect();
        self.policy.handle_touch(&mut self.shell, &points);
        self.apply_focus_request();

        let under = self.surface_under(location);
        touch.down(
            self,
            under,
            &DownEvent {
                slot,
                location,
                serial,
                time: event.time_msec(),
            },
        );
    }

    fn handle_touch_motion<B: InputBackend>(&mut self, event: B::TouchMotionEvent) {
        let Some(touch) = self.seat.get_touch() else {
            return;
        };
        let Some(location) = self.touch_location::<_, B>(&event) else {
            return;
        };
        let slot = event.slot();
        if let Some((_, point)) = self
            .touch_points
            .iter_mut()
            .find(|(existing, _)| *existing == slot)
        {
            *point = location;
        }

        let under = self.surface_under(location);
        touch.motion(
            self,
            under,
            &TouchMotionEvent {
                slot,
                location,
                time: event.time_msec(),
            },
        );
    }

    fn handle_touch_up<B: InputBackend>(&mut self, event: B::TouchUpEvent) {
        let Some(touch) = self.seat.get_touch() else {
            return;
        };
        let slot = event.slot();
        self.touch_points.retain(|(existing, _)| *existing != slot);
        touch.up(
            self,
            &UpEvent {
                slot,
                serial: SERIAL_COUNTER.next_serial(),
                time: event.time_msec(),
            },
        );
    }

    fn handle_touch_cancel(&mut self) {
        self.touch_points.clear();
        if let Some(touch) = self.seat.get_touch() {
            touch.cancel(self);
        }
    }

    fn primary_output_geometry(&self) -> Option<Rectangle<i32, Logical>> {
        let space = &self.shell.space;
        space
            .outputs()
            .next()
            .and_then(|output| space.output_geometry(output))
    }

    /// Keeps `location` inside the union of all outputs.
    fn clamp_to_outputs(&self, location: Point<f64, Logical>) -> Point<f64, Logical> {
        let space = &self.shell.space;
        let Some(bounds) = space
            .outputs()
            .filter_map(|output| space.output_geometry(output))
            .reduce(|acc, geometry| acc.merge(geometry))
        else {
            return location;
        };
        let max_x = f64::from(bounds.loc.x + bounds.size.w - 1);
        let max_y = f64::from(bounds.loc.y + bounds.size.h - 1);
        (
            location.x.clamp(f64::from(bounds.loc.x), max_x),
            location.y.clamp(f64::from(bounds.loc.y), max_y),
        )
            .into()
    }
}
