#[cfg(test)]
mod tests {
    use std::ffi::{c_int, CStr};
    use std::mem;
    use std::sync::Arc;

    use crate::errors::BridgeError;
    use crate::gc;
    use crate::handle::{Capability, TaggedHandle};
    use crate::mock::{fake_handle, fake_raw, Leaf, MockBackend, Node, serial};
    use crate::ownership::{OwnerPolicy, Wrapper};
    use crate::params::ParamMap;
    use crate::pipeline::*;
    use crate::registry;

    fn setup() -> (Arc<MockBackend>, Backend, Arc<Context>) {
        let mock = MockBackend::new();
        let backend = Backend::new(mock.clone());
        let context = Context::open(&backend).unwrap();
        (mock, backend, context)
    }

    fn ints(values: &[c_int]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn test_context_owns_ports_and_streams() {
        let _serial = serial();
        let (mock, _backend, context) = setup();
        let audio = context.open_port(PortKind::Audio, "alsa").unwrap();
        let video = context.open_port(PortKind::Video, "xv").unwrap();
        assert_eq!(audio.handle().capability(), Capability::AUDIO_PORT);
        assert_eq!(
            audio.ownership().owner().unwrap().handle(),
            context.handle()
        );

        let stream = context.open_stream(Some(&audio), Some(&video)).unwrap();
        assert_eq!(stream.ports().len(), 2);
        assert_eq!(
            stream.ownership().owner().unwrap().handle(),
            context.handle()
        );

        let audio_handle = audio.handle();
        let context_handle = context.handle();
        drop(audio);
        drop(context);
        assert_eq!(mock.destroy_count(audio_handle), 0);

        let stream_handle = stream.handle();
        drop(stream);
        assert_eq!(mock.destroy_count(stream_handle), 1);
        assert_eq!(mock.destroy_count(audio_handle), 1);
        drop(video);
        assert_eq!(mock.destroy_count(context_handle), 1);
    }

    #[test]
    fn test_stream_port_kinds_checked() {
        let _serial = serial();
        let (_mock, _backend, context) = setup();
        let video = context.open_port(PortKind::Video, "xv").unwrap();
        assert_eq!(
            context.open_stream(Some(&video), None).err(),
            Some(BridgeError::KindMismatch(video.handle()))
        );
        assert_eq!(
            context.open_filter("invert", &[video.clone()], &[]).err(),
            Some(BridgeError::KindMismatch(video.handle()))
        );
    }

    #[test]
    fn test_port_owners_validated() {
        let _serial = serial();
        let (mock, backend, _context) = setup();
        let raw = fake_raw();

        assert_eq!(
            Port::from_handle(&backend, PortKind::Audio, raw, None, false).err(),
            Some(BridgeError::MissingOwner {
                kind: Capability::AUDIO_PORT
            })
        );

        let canvas = Node::find_or_create(
            fake_handle(Capability::CANVAS),
            None,
            OwnerPolicy::NONE,
            false,
            &mock,
        )
        .unwrap();
        assert_eq!(
            Port::from_handle(&backend, PortKind::Audio, raw, Some(canvas), false).err(),
            Some(BridgeError::InvalidOwner {
                kind: Capability::AUDIO_PORT,
                owner: Capability::CANVAS,
            })
        );
        assert!(!registry::contains(TaggedHandle::new(raw, Capability::AUDIO_PORT)));
    }

    #[test]
    fn test_filter_endpoints() {
        let _serial = serial();
        let (mock, _backend, context) = setup();
        let target = context.open_port(PortKind::Video, "xv").unwrap();
        let filter = context
            .open_filter("invert", &[], &[target.clone()])
            .unwrap();
        assert_eq!(filter.name(), "invert");
        assert_eq!(filter.video_targets().len(), 1);
        assert!(filter.audio_targets().is_empty());

        let inputs = filter.inputs().unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name(), "video in");
        let input = filter.input("video in").unwrap().unwrap();
        assert!(Arc::ptr_eq(&input, &inputs[0]));
        assert!(filter.input("audio in").unwrap().is_none());

        let port = input.port().unwrap().unwrap();
        assert_eq!(port.kind(), PortKind::Video);
        assert!(!port.ownership().disposes());
        assert_eq!(port.ownership().owner().unwrap().handle(), input.handle());

        // The output feeds the target, which keeps its original owner.
        let output = filter.output("video out").unwrap().unwrap();
        let current = output.port().unwrap().unwrap();
        assert!(Arc::ptr_eq(&current, &target));
        assert_eq!(current.ownership().owner().unwrap().handle(), context.handle());

        let port_handle = port.handle();
        let input_handle = input.handle();
        drop((port, input, inputs));
        assert!(!registry::contains(port_handle));
        assert!(!registry::contains(input_handle));
        assert_eq!(mock.destroy_count(port_handle), 0);
    }

    #[test]
    fn test_wired_ports_survive_collection() {
        let _serial = serial();
        let (mock, _backend, context) = setup();
        let filter = context.open_filter("invert", &[], &[]).unwrap();
        let filter_handle = filter.handle();
        let output = filter.output("video out").unwrap().unwrap();
        let output_raw = output.handle().raw();

        let port = output.port().unwrap().unwrap();
        assert_eq!(port.ownership().owner().unwrap().handle(), output.handle());
        output.wire(&port).unwrap();
        assert!(Arc::ptr_eq(&output.target().unwrap(), &port));
        assert!(port.is_live());

        let weak = Arc::downgrade(&port);
        drop((port, output, filter));

        gc::collect();
        assert!(weak.upgrade().is_some());
        assert_eq!(mock.destroy_count(filter_handle), 0);

        mock.unwire(output_raw);
        gc::collect();
        assert!(weak.upgrade().is_none());
        assert_eq!(mock.destroy_count(filter_handle), 1);
        assert!(registry::contains(context.handle()));
    }

    #[test]
    fn test_filter_parameters() {
        let _serial = serial();
        let (_mock, _backend, context) = setup();
        let filter = context.open_filter("expand", &[], &[]).unwrap();
        assert_eq!(filter.parameter_descriptors().unwrap().len(), 6);

        let params = filter.parameters().unwrap().unwrap();
        assert_eq!(params.get::<i64>("overlay_y_offset"), Ok(16));
        assert_eq!(params.get::<f64>("aspect"), Ok(4.0 / 3.0));
        assert_eq!(params.get::<bool>("enable_automatic_shift"), Ok(false));
        assert_eq!(params.get::<i64>("version"), Ok(2));
        assert!(!params.contains_key("label"));

        let update = crate::param_map!(
            {"overlay_y_offset": &8i64},
            {"centre_cut_out_mode": &true},
            {"label": &"wide".to_owned()},
            {"version": &7i64}
        );
        assert_eq!(filter.set_parameters(&update), Ok(true));

        let params = filter.parameters().unwrap().unwrap();
        assert_eq!(params.get::<i64>("overlay_y_offset"), Ok(8));
        assert_eq!(params.get::<bool>("centre_cut_out_mode"), Ok(true));
        assert_eq!(params.get::<String>("label"), Ok("wide".to_owned()));
        assert_eq!(params.get::<i64>("version"), Ok(2));
        assert_eq!(params.get::<f64>("aspect"), Ok(4.0 / 3.0));

        let mut bad = ParamMap::new();
        bad.set("aspect", &"square".to_owned()).unwrap();
        assert!(matches!(
            filter.set_parameters(&bad),
            Err(BridgeError::Param(_))
        ));
        let params = filter.parameters().unwrap().unwrap();
        assert_eq!(params.get::<f64>("aspect"), Ok(4.0 / 3.0));
    }

    #[test]
    fn test_filter_without_parameters() {
        let _serial = serial();
        let (_mock, _backend, context) = setup();
        let filter = context.open_filter("invert", &[], &[]).unwrap();
        assert!(filter.parameter_descriptors().is_none());
        assert_eq!(filter.parameters(), Ok(None));
        assert_eq!(filter.set_parameters(&ParamMap::new()), Ok(false));
    }

    #[test]
    fn test_events_decoded() {
        let _serial = serial();
        let (mock, _backend, context) = setup();
        let stream = context.open_stream(None, None).unwrap();
        let queue = stream.event_queue().unwrap();
        let raw_queue = queue.handle().raw();

        mock.push_event(
            raw_queue,
            RawEvent {
                event_type: EventType::FrameFormatChange.into(),
                data: ints(&[720, 576, 2, 0]),
            },
        );
        let description: &'static CStr = c"Buffering";
        let mut progress = (description.as_ptr() as usize).to_ne_bytes().to_vec();
        progress.extend(ints(&[40]));
        mock.push_event(
            raw_queue,
            RawEvent {
                event_type: EventType::Progress.into(),
                data: progress,
            },
        );
        let mut title = vec![0u8; 2 * mem::size_of::<c_int>() + 256];
        title[8..13].copy_from_slice(b"Intro");
        mock.push_event(
            raw_queue,
            RawEvent {
                event_type: EventType::SetTitle.into(),
                data: title,
            },
        );

        let event = queue.next_event().unwrap().unwrap();
        assert_eq!(event.event_type(), EventType::FrameFormatChange);
        assert_eq!(event.data().get::<i64>("width"), Ok(720));
        assert_eq!(event.data().get::<i64>("height"), Ok(576));
        assert_eq!(event.data().get::<i64>("aspect"), Ok(2));
        assert!(!event.data().contains_key("int"));

        let event = queue.next_event().unwrap().unwrap();
        assert_eq!(event.event_type(), EventType::Progress);
        assert_eq!(
            event.data().get::<String>("description"),
            Ok("Buffering".to_owned())
        );
        assert_eq!(event.data().get::<i64>("percent"), Ok(40));

        let event = queue.next_event().unwrap().unwrap();
        assert_eq!(event.event_type(), EventType::SetTitle);
        assert_eq!(event.data().get::<String>("str"), Ok("Intro".to_owned()));

        assert!(queue.next_event().unwrap().is_none());
    }

    #[test]
    fn test_event_payload_fallbacks() {
        let _serial = serial();
        let (mock, _backend, context) = setup();
        let stream = context.open_stream(None, None).unwrap();
        let queue = stream.event_queue().unwrap();
        let raw_queue = queue.handle().raw();

        mock.push_event(
            raw_queue,
            RawEvent {
                event_type: EventType::NumButtons.into(),
                data: ints(&[3]),
            },
        );
        mock.push_event(
            raw_queue,
            RawEvent {
                event_type: 99,
                data: vec![1, 2, 3],
            },
        );
        mock.push_event(
            raw_queue,
            RawEvent {
                event_type: EventType::DroppedFrames.into(),
                data: ints(&[1, 2]),
            },
        );

        let event = queue.next_event().unwrap().unwrap();
        assert_eq!(event.data().get::<i64>("int"), Ok(3));
        assert_eq!(event.data().get::<i64>("num_buttons"), Ok(3));

        let event = queue.next_event().unwrap().unwrap();
        assert_eq!(event.event_type(), EventType::Other(99));
        assert_eq!(event.data().get::<Vec<u8>>("data"), Ok(vec![1, 2, 3]));

        let event = queue.next_event().unwrap().unwrap();
        assert_eq!(event.data().get::<Vec<u8>>("data"), Ok(ints(&[1, 2])));
        assert!(!event.data().contains_key("skipped_frames"));
    }

    #[test]
    fn test_events_freed_on_drop() {
        let _serial = serial();
        let (mock, _backend, context) = setup();
        let stream = context.open_stream(None, None).unwrap();
        let queue = stream.event_queue().unwrap();
        let raw = mock.push_event(
            queue.handle().raw(),
            RawEvent {
                event_type: EventType::NumButtons.into(),
                data: ints(&[1]),
            },
        );

        let event = queue.next_event().unwrap().unwrap();
        let handle = TaggedHandle::new(raw, Capability::EVENT);
        assert_eq!(event.handle(), handle);
        assert_eq!(event.ownership().owner().unwrap().handle(), queue.handle());

        drop(event);
        assert_eq!(mock.destroy_count(handle), 1);
        assert!(!registry::contains(handle));
    }

    #[test]
    fn test_allocation_failures() {
        let _serial = serial();
        let (mock, backend, context) = setup();
        mock.fail_allocations(true);

        assert_eq!(
            Context::open(&backend).err(),
            Some(BridgeError::Allocation("context".to_owned()))
        );
        assert!(matches!(
            context.open_port(PortKind::Audio, "alsa"),
            Err(BridgeError::Allocation(_))
        ));
        assert!(matches!(
            context.open_filter("expand", &[], &[]),
            Err(BridgeError::Allocation(_))
        ));
    }

    #[test]
    fn test_failed_wrap_destroys_new_resource() {
        let _serial = serial();
        let (mock, _backend, context) = setup();
        let raw = fake_raw();
        let handle = TaggedHandle::new(raw, Capability::STREAM);
        let borrowed = Leaf::find_or_create(handle, &mock).unwrap();

        mock.reuse_next(raw);
        assert_eq!(
            context.open_stream(None, None).err(),
            Some(BridgeError::KindMismatch(handle))
        );
        assert_eq!(mock.destroy_count(handle), 1);
        assert!(registry::lookup_as::<Leaf>(handle).is_some());
        drop(borrowed);

        let port = TaggedHandle::new(fake_raw(), Capability::VIDEO_PORT);
        let _node = Node::find_or_create(port, None, OwnerPolicy::NONE, false, &mock).unwrap();
        mock.reuse_next(port.raw());
        assert!(context.open_port(PortKind::Video, "xv").is_err());
        assert_eq!(mock.destroy_count(port), 1);

        let stream = context.open_stream(None, None).unwrap();
        assert_eq!(mock.destroy_count(stream.handle()), 0);
    }
}
