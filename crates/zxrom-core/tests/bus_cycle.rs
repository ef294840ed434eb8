use std::time::Duration;

use anyhow::{Context, Result};
use ctor::ctor;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use zxrom_core::{
    Board, LineMap, LogicalAddress, RomSet, Variant,
    address::scatter,
    bus::SimBus,
    config::BoardConfig,
    engine::BusEngine,
    image::{DEFAULT_LABEL_OFFSET, LABEL_LEN, ROM_SIZE, RomImage},
    lines::line_mask,
    switch::SwitchOutcome,
};

#[ctor]
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_file(true)
        .with_line_number(true)
        .with_max_level(Level::DEBUG)
        .pretty()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn random_image(seed: u64, first: u8) -> Result<RomImage> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = vec![0u8; ROM_SIZE];
    rng.fill(&mut bytes[..]);
    bytes[0] = first;
    RomImage::from_bytes(&bytes).context("fixture image")
}

/// Plays one complete host read: address and strobe asserted, engine polled,
/// data restored to logical order, strobe released, engine polled again.
fn host_read(
    map: &LineMap,
    board: &Board,
    bus: &SimBus,
    engine: &mut BusEngine<'_, SimBus>,
    address: u16,
) -> u8 {
    let lines = scatter(map, LogicalAddress::from_masked(address)).bits();
    bus.set_inputs(map.address_mask() | line_mask(map.rom_access), lines);
    engine.poll();
    let wire = board.tables().wire_byte(bus.outputs());
    bus.set_input(map.rom_access, true);
    engine.poll();
    board.tables().preconverter().restore(wire)
}

#[test]
fn first_fetch_after_reset_is_di() -> Result<()> {
    let config = BoardConfig::for_variant(Variant::CyclerDirect);
    let map = config.lines;
    let mut raw = vec![0u8; ROM_SIZE];
    raw[0] = 0xF3;
    let board = Board::new(
        config,
        RomSet::default().bank("48K", RomImage::from_bytes(&raw)?),
    )?;
    let bus = SimBus::idle(&map);
    let mut engine = board.engine(&bus)?;

    // The scrambled GPIO pattern for address 0 is all address lines low.
    bus.set_inputs(map.address_mask() | line_mask(map.rom_access), 0);
    engine.poll();
    assert_eq!(bus.outputs() & board.tables().data_mask(), 0xEB);
    Ok(())
}

#[test]
fn every_address_reads_back_its_logical_byte() -> Result<()> {
    let config = BoardConfig::for_variant(Variant::CyclerDirect);
    let map = config.lines;
    let image = random_image(0x5EC7, 0xF3)?;
    let expected = image.as_bytes().to_vec();
    let board = Board::new(config, RomSet::default().bank("48K", image))?;
    let bus = SimBus::idle(&map);
    let mut engine = board.engine(&bus)?;

    for address in 0..ROM_SIZE as u16 {
        let byte = host_read(&map, &board, &bus, &mut engine, address);
        assert_eq!(byte, expected[usize::from(address)], "address {address:#06x}");
    }
    assert_eq!(engine.report().reads, ROM_SIZE as u64);
    Ok(())
}

#[test]
fn announced_switch_serves_label_then_next_bank() -> Result<()> {
    let config = BoardConfig::for_variant(Variant::Cycler);
    let map = config.lines;
    let board = Board::new(
        config,
        RomSet::default()
            .bank("48K", random_image(1, 0xF3)?)
            .bank("Manic Miner", random_image(2, 0x01)?)
            .announcement(RomImage::filled(0x00)),
    )?;
    let bus = SimBus::idle(&map);
    let mut engine = board.engine(&bus)?;
    let mut switch = board
        .switch_controller(&bus)?
        .context("cycler has a switcher")?;
    let ms = Duration::from_millis;

    bus.set_input(27, true);
    switch.poll(ms(0));
    let engaged = switch.poll(ms(50));
    assert_eq!(
        engaged,
        Some(SwitchOutcome::Engaged {
            from: 0,
            to: 1,
            announced: true
        })
    );
    assert!(bus.output_level(map.reset));

    let label: Vec<u8> = (0..LABEL_LEN)
        .map(|i| host_read(&map, &board, &bus, &mut engine, (DEFAULT_LABEL_OFFSET + i) as u16))
        .collect();
    assert_eq!(&label[..11], b"Manic Miner");

    bus.set_input(27, false);
    switch.poll(ms(100));
    assert!(matches!(
        switch.poll(ms(700)),
        Some(SwitchOutcome::Released { commit_after: Some(d) }) if d == ms(1200)
    ));
    assert!(!bus.output_level(map.reset));

    assert_eq!(switch.commit(), (0, 1));
    assert!(bus.output_level(map.reset));
    switch.finish_commit();
    assert!(!bus.output_level(map.reset));
    assert_eq!(host_read(&map, &board, &bus, &mut engine, 0), 0x01);

    // Full cycle returns to the first bank.
    bus.set_input(27, true);
    switch.poll(ms(3000));
    switch.poll(ms(3050));
    bus.set_input(27, false);
    switch.poll(ms(3100));
    switch.poll(ms(3700));
    assert_eq!(switch.commit(), (1, 0));
    switch.finish_commit();
    assert_eq!(host_read(&map, &board, &bus, &mut engine, 0), 0xF3);
    Ok(())
}
