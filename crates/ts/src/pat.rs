use crate::{Result, TsError};

/// One program entry of the program association table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Program Association Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub programs: Vec<PatProgram>,
}

impl Pat {
    /// Parse a PAT from PSI section data (pointer field already removed).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(TsError::InsufficientData {
                expected: 8,
                actual: data.len(),
            });
        }
        let table_id = data[0];
        if table_id != 0x00 {
            return Err(TsError::InvalidTableId {
                expected: 0x00,
                actual: table_id,
            });
        }
        if data[1] & 0x80 == 0 {
            return Err(TsError::ParseError(
                "PAT must have section syntax indicator set".to_string(),
            ));
        }
        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
        if section_length < 9 {
            return Err(TsError::InvalidSectionLength(section_length));
        }
        let section_end = 3 + section_length as usize;
        if data.len() < section_end {
            return Err(TsError::InsufficientData {
                expected: section_end,
                actual: data.len(),
            });
        }

        let transport_stream_id = u16::from_be_bytes([data[3], data[4]]);
        let version_number = (data[5] >> 1) & 0x1F;

        // Exclude CRC32
        let programs = data[8..section_end - 4]
            .chunks_exact(4)
            .map(|entry| PatProgram {
                program_number: u16::from_be_bytes([entry[0], entry[1]]),
                pmt_pid: ((entry[2] as u16 & 0x1F) << 8) | entry[3] as u16,
            })
            .collect();

        Ok(Pat {
            transport_stream_id,
            version_number,
            programs,
        })
    }

    /// PIDs carrying program maps. Program number 0 points at the network PID and is skipped.
    pub fn pmt_pids(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.programs
            .iter()
            .filter(|p| p.program_number != 0)
            .map(|p| (p.pmt_pid, p.program_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(programs: &[(u16, u16)]) -> Vec<u8> {
        let section_length = 9 + programs.len() * 4;
        let mut s = vec![
            0x00,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            0x00,
            0x01,
            0xC3,
            0x00,
            0x00,
        ];
        for &(number, pid) in programs {
            s.extend_from_slice(&number.to_be_bytes());
            s.push(0xE0 | (pid >> 8) as u8);
            s.push(pid as u8);
        }
        s.extend_from_slice(&[0; 4]);
        s
    }

    #[test]
    fn test_parse_programs() {
        let pat = Pat::parse(&section(&[(0, 0x10), (1, 0x1000), (2, 0x1001)])).unwrap();
        assert_eq!(pat.transport_stream_id, 1);
        assert_eq!(pat.version_number, 1);
        assert_eq!(pat.programs.len(), 3);
        let pids: Vec<_> = pat.pmt_pids().collect();
        assert_eq!(pids, vec![(0x1000, 1), (0x1001, 2)]);
    }

    #[test]
    fn test_wrong_table_id() {
        let mut s = section(&[(1, 0x1000)]);
        s[0] = 0x02;
        assert!(matches!(
            Pat::parse(&s),
            Err(TsError::InvalidTableId { expected: 0, actual: 2 })
        ));
    }

    #[test]
    fn test_truncated_section() {
        let s = section(&[(1, 0x1000)]);
        assert!(matches!(
            Pat::parse(&s[..10]),
            Err(TsError::InsufficientData { .. })
        ));
    }
}
