/// COM1 base port.
pub const SERIAL_PORT: u16 = 0x3F8;

// Primary ATA bus. Data transfers are 16-bit through ATA_DATA; everything
// else is byte-wide.
pub const ATA_DATA: u16 = 0x1F0;
pub const ATA_ERROR: u16 = 0x1F1;
pub const ATA_FEATURES: u16 = 0x1F1;
pub const ATA_SECTOR_COUNT: u16 = 0x1F2;
pub const ATA_LBA_LO: u16 = 0x1F3;
pub const ATA_LBA_MID: u16 = 0x1F4;
pub const ATA_LBA_HI: u16 = 0x1F5;
pub const ATA_DRIVE_HEAD: u16 = 0x1F6;
pub const ATA_STATUS: u16 = 0x1F7;
pub const ATA_COMMAND: u16 = 0x1F7;
pub const ATA_ALT_STATUS: u16 = 0x3F6;
pub const ATA_DEVICE_CONTROL: u16 = 0x3F6;
