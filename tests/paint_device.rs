use tilepaint::{
    CompositeOpId, CompositeOpRegistry, Masked, PaintDevice, PaintError, Painter, PixelBuffer, PixelFormat, Rect,
    RectIter, RectIterMut, Selection,
};

fn rgba_device(w: u32, h: u32) -> PaintDevice {
    PaintDevice::new(w, h, PixelFormat::RGBA8).unwrap()
}

#[test]
fn black_square_allocates_one_tile() {
    let dev = rgba_device(128, 128);
    let registry = CompositeOpRegistry::scalar();
    let mut painter = Painter::new(&dev, &registry, CompositeOpId::Over).unwrap();
    painter.apply_solid(Rect::new(5, 5, 10, 10), &[0, 0, 0, 255], None).unwrap();
    assert_eq!(painter.dirty(), Rect::new(5, 5, 10, 10));

    let buf = dev.read(Rect::new(0, 0, 20, 20)).unwrap();
    for y in 0..20 {
        for x in 0..20 {
            let inside = (5..15).contains(&x) && (5..15).contains(&y);
            let expected: &[u8] = if inside { &[0, 0, 0, 255] } else { &[0, 0, 0, 0] };
            assert_eq!(buf.pixel(x, y), expected, "pixel ({x},{y})");
        }
    }
    assert_eq!(dev.tile_count(), 1);
    assert_eq!(dev.exact_bounds(), Rect::new(5, 5, 10, 10));
}

#[test]
fn written_pixels_read_back() {
    let dev = rgba_device(200, 150);
    let rect = Rect::new(50, 40, 90, 70);
    let data: Vec<u8> = (0..rect.area() as usize * 4).map(|i| (i % 251) as u8).collect();
    let buf = PixelBuffer::from_raw(rect, PixelFormat::RGBA8, data).unwrap();
    dev.write(&buf).unwrap();
    assert_eq!(dev.read(rect).unwrap(), buf);
    assert_eq!(dev.tile_count(), Rect::new(50, 40, 90, 70).tile_range().len());
}

#[test]
fn unwritten_regions_read_default_without_allocating() {
    let dev = rgba_device(300, 300).with_default_pixel(&[1, 2, 3, 4]).unwrap();
    let buf = dev.read(Rect::new(10, 100, 250, 120)).unwrap();
    assert!(buf.data().chunks_exact(4).all(|px| px == [1, 2, 3, 4]));
    assert_eq!(dev.tile_count(), 0);
    assert_eq!(dev.pixel(299, 299).unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn out_of_bounds_access_is_rejected() {
    let dev = rgba_device(64, 64);
    assert!(matches!(dev.read(Rect::new(60, 0, 5, 1)), Err(PaintError::OutOfBounds { .. })));
    assert!(matches!(dev.read(Rect::new(i32::MAX - 5, 0, 10, 1)), Err(PaintError::OutOfBounds { .. })));
    assert!(matches!(dev.fill(Rect::new(0, 0, u32::MAX, 1), &[0; 4]), Err(PaintError::OutOfBounds { .. })));
    assert!(matches!(dev.set_pixel(-1, 0, &[0; 4]), Err(PaintError::OutOfBounds { .. })));
    assert!(matches!(dev.set_pixel(0, 0, &[0; 3]), Err(PaintError::FormatMismatch { .. })));
    assert!(matches!(
        PaintDevice::new(0, 10, PixelFormat::RGBA8),
        Err(PaintError::InvalidDimensions { .. })
    ));
}

#[test]
fn forks_share_tiles_until_written() {
    let dev = rgba_device(128, 128);
    dev.fill(Rect::new(0, 0, 128, 128), &[9, 9, 9, 255]).unwrap();
    let fork = dev.fork();
    fork.set_pixel(3, 3, &[1, 1, 1, 1]).unwrap();
    assert_eq!(dev.pixel(3, 3).unwrap(), vec![9, 9, 9, 255]);
    assert_eq!(fork.pixel(3, 3).unwrap(), vec![1, 1, 1, 1]);
    assert_eq!(fork.snapshot().changed_tiles(&dev.snapshot()), vec![(0, 0)]);
}

#[test]
fn unmasked_iteration_is_row_major_and_complete() {
    let dev = rgba_device(100, 100);
    let rect = Rect::new(30, 60, 70, 5);
    let mut it = RectIter::new(&dev, rect).unwrap();
    let mut visited = Vec::new();
    while it.advance() {
        visited.push((it.x(), it.y()));
    }
    let expected: Vec<(i32, i32)> = (60..65).flat_map(|y| (30..100).map(move |x| (x, y))).collect();
    assert_eq!(visited, expected);
}

#[test]
fn masked_iteration_visits_a_subset() {
    let dev = rgba_device(128, 128);
    let selection = Selection::new(128, 128).unwrap();
    selection.select_rect(Rect::new(10, 10, 60, 3), 200).unwrap();
    selection.select_rect(Rect::new(100, 0, 5, 128), 255).unwrap();

    let rect = Rect::new(0, 0, 128, 20);
    let mut all = Vec::new();
    let mut it = RectIter::new(&dev, rect).unwrap();
    while it.advance() {
        all.push((it.x(), it.y()));
    }

    let mut masked = Masked::new(RectIter::new(&dev, rect).unwrap(), &selection).unwrap();
    let mut seen = Vec::new();
    while masked.advance() {
        assert!(masked.selectedness() > 0);
        seen.push((masked.x(), masked.y()));
    }
    assert_eq!(seen.len(), 60 * 3 + 5 * 20);
    let mut cursor = all.iter();
    assert!(seen.iter().all(|p| cursor.any(|q| q == p)), "masked order must follow unmasked order");
}

#[test]
fn write_cursor_edits_through_runs() {
    let dev = rgba_device(130, 2);
    let rect = Rect::new(0, 0, 130, 1);
    let mut runs = Vec::new();
    {
        let mut it = RectIterMut::new(&dev, rect).unwrap();
        let mut more = it.advance();
        while more {
            runs.push(it.conseq_pixels());
            for px in it.line_mut().chunks_exact_mut(4) {
                px.copy_from_slice(&[7, 7, 7, 7]);
            }
            more = it.advance_run();
        }
    }
    assert_eq!(runs, vec![64, 64, 2]);
    let row = dev.read(rect).unwrap();
    assert!(row.data().chunks_exact(4).all(|px| px == [7, 7, 7, 7]));
    assert_eq!(dev.pixel(0, 1).unwrap(), vec![0, 0, 0, 0]);
    assert_eq!(dev.tile_count(), 3);
}

#[test]
fn selection_limits_painting() {
    let dev = rgba_device(64, 64);
    let registry = CompositeOpRegistry::scalar();
    let selection = Selection::new(64, 64).unwrap();
    selection.select_rect(Rect::new(0, 0, 32, 64), 255).unwrap();
    let mut painter = Painter::new(&dev, &registry, CompositeOpId::Copy)
        .unwrap()
        .with_selection(Some(&selection));
    painter.apply_solid(Rect::new(0, 0, 64, 64), &[255, 255, 255, 255], None).unwrap();
    assert_eq!(dev.pixel(31, 10).unwrap(), vec![255, 255, 255, 255]);
    assert_eq!(dev.pixel(32, 10).unwrap(), vec![0, 0, 0, 0]);
}

#[test]
fn snapshots_restore_earlier_state() {
    let dev = rgba_device(128, 64);
    dev.fill(Rect::new(0, 0, 10, 10), &[1, 1, 1, 1]).unwrap();
    let snap = dev.snapshot();
    dev.fill(Rect::new(70, 0, 10, 10), &[2, 2, 2, 2]).unwrap();
    dev.set_pixel(0, 0, &[3, 3, 3, 3]).unwrap();
    assert_eq!(dev.tile_count(), 2);

    dev.restore(&snap).unwrap();
    assert_eq!(dev.tile_count(), 1);
    assert_eq!(dev.pixel(0, 0).unwrap(), vec![1, 1, 1, 1]);
    assert_eq!(dev.pixel(75, 5).unwrap(), vec![0, 0, 0, 0]);

    let other = rgba_device(64, 64);
    assert!(matches!(other.restore(&snap), Err(PaintError::FormatMismatch { .. })));
}
